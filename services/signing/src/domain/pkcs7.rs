/// Detached PKCS#7 (CMS SignedData) container for PDF signatures
///
/// Builds the adbe.pkcs7.detached blob that goes into the /Contents hole:
/// signed attributes over the document digest, the KMS-produced RSA
/// signature, and the signing certificate, assembled with the DER
/// primitives from [`super::der`].
///
/// Requirements: 3.4, 3.5
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::der::{self, DerError};

// OID arcs used by the container
const OID_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 1];
const OID_SIGNED_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 2];
const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];
const OID_ATTR_CONTENT_TYPE: &[u64] = &[1, 2, 840, 113549, 1, 9, 3];
const OID_ATTR_MESSAGE_DIGEST: &[u64] = &[1, 2, 840, 113549, 1, 9, 4];
const OID_ATTR_SIGNING_TIME: &[u64] = &[1, 2, 840, 113549, 1, 9, 5];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Pkcs7Error {
    /// Certificate PEM lacks the BEGIN/END CERTIFICATE armor
    #[error("certificate PEM is malformed")]
    InvalidPem,
    /// PEM body is not valid base64
    #[error("certificate base64 decode failed: {0}")]
    InvalidBase64(String),
    /// TLV walk over the certificate failed
    #[error("certificate DER error: {0}")]
    Der(#[from] DerError),
    /// Certificate structure missing an expected field
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),
    /// Signed attributes input was not a SET OF
    #[error("signed attributes must be a DER SET OF")]
    InvalidSignedAttributes,
}

/// Issuer name and serial number lifted verbatim from the certificate
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerAndSerial {
    /// Raw issuer Name TLV
    pub issuer: Vec<u8>,
    /// Raw serialNumber INTEGER TLV
    pub serial: Vec<u8>,
}

/// Decode a PEM-armored X.509 certificate into its DER bytes
pub fn decode_pem_certificate(pem: &str) -> Result<Vec<u8>, Pkcs7Error> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let start = pem.find(BEGIN).ok_or(Pkcs7Error::InvalidPem)? + BEGIN.len();
    let end = pem.find(END).ok_or(Pkcs7Error::InvalidPem)?;
    if end < start {
        return Err(Pkcs7Error::InvalidPem);
    }
    let body: String = pem[start..end].chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(body)
        .map_err(|e| Pkcs7Error::InvalidBase64(e.to_string()))
}

/// Walk the certificate far enough to lift issuer and serial (Req 3.5)
///
/// TBSCertificate starts with an optional [0] version, then serialNumber,
/// signature AlgorithmIdentifier, issuer Name. Everything past the issuer
/// is left untouched.
pub fn issuer_and_serial(cert_der: &[u8]) -> Result<IssuerAndSerial, Pkcs7Error> {
    let outer = der::read_header(cert_der, 0)?;
    if outer.tag != 0x30 {
        return Err(Pkcs7Error::MalformedCertificate(
            "certificate is not a SEQUENCE".to_string(),
        ));
    }
    let mut offset = outer.header_len;

    let tbs = der::read_header(cert_der, offset)?;
    if tbs.tag != 0x30 {
        return Err(Pkcs7Error::MalformedCertificate(
            "tbsCertificate is not a SEQUENCE".to_string(),
        ));
    }
    offset += tbs.header_len;

    // Optional [0] EXPLICIT version
    let mut field = der::read_header(cert_der, offset)?;
    if field.tag == 0xa0 {
        offset += field.total_len();
        field = der::read_header(cert_der, offset)?;
    }

    // serialNumber
    if field.tag != 0x02 {
        return Err(Pkcs7Error::MalformedCertificate(
            "serialNumber is not an INTEGER".to_string(),
        ));
    }
    let serial_end = offset + field.total_len();
    if cert_der.len() < serial_end {
        return Err(Pkcs7Error::Der(DerError::Truncated(offset)));
    }
    let serial = cert_der[offset..serial_end].to_vec();
    offset = serial_end;

    // signature AlgorithmIdentifier
    let alg = der::read_header(cert_der, offset)?;
    if alg.tag != 0x30 {
        return Err(Pkcs7Error::MalformedCertificate(
            "signature algorithm is not a SEQUENCE".to_string(),
        ));
    }
    offset += alg.total_len();

    // issuer Name
    let issuer_header = der::read_header(cert_der, offset)?;
    if issuer_header.tag != 0x30 {
        return Err(Pkcs7Error::MalformedCertificate(
            "issuer is not a SEQUENCE".to_string(),
        ));
    }
    let issuer_end = offset + issuer_header.total_len();
    if cert_der.len() < issuer_end {
        return Err(Pkcs7Error::Der(DerError::Truncated(offset)));
    }

    Ok(IssuerAndSerial {
        issuer: cert_der[offset..issuer_end].to_vec(),
        serial,
    })
}

/// Build the DER-sorted signed attributes SET OF (Req 3.4)
///
/// Three attributes: contentType (id-data), signingTime and
/// messageDigest over the document's ByteRange digest. This exact
/// encoding is what the signature covers.
pub fn signed_attributes(message_digest: &[u8; 32], signing_time: DateTime<Utc>) -> Vec<u8> {
    let content_type = attribute(OID_ATTR_CONTENT_TYPE, der::oid(OID_DATA));
    let signing_time = attribute(
        OID_ATTR_SIGNING_TIME,
        der::utc_time(&signing_time.format("%y%m%d%H%M%SZ").to_string()),
    );
    let message_digest = attribute(OID_ATTR_MESSAGE_DIGEST, der::octet_string(message_digest));
    der::set_of(vec![content_type, signing_time, message_digest])
}

/// SHA-256 over the SET OF encoding of the signed attributes
///
/// This digest is what the remote signer actually signs.
pub fn attributes_digest(signed_attrs: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signed_attrs);
    hasher.finalize().into()
}

/// Assemble the detached SignedData container (Req 3.5)
///
/// `signed_attrs` is the SET OF form from [`signed_attributes`];
/// `signature` is the raw RSA signature over its digest. Inside
/// SignerInfo the attributes are re-tagged [0] IMPLICIT, which is the
/// one place their encoding differs from what was signed.
pub fn build_signed_data(
    cert_der: &[u8],
    signed_attrs: &[u8],
    signature: &[u8],
) -> Result<Vec<u8>, Pkcs7Error> {
    if signed_attrs.first() != Some(&0x31) {
        return Err(Pkcs7Error::InvalidSignedAttributes);
    }
    let ias = issuer_and_serial(cert_der)?;

    let digest_alg = der::sequence(&[der::oid(OID_SHA256), der::null()].concat());
    let sig_alg = der::sequence(&[der::oid(OID_RSA_ENCRYPTION), der::null()].concat());
    // Detached signature: EncapsulatedContentInfo carries no eContent
    let encap = der::sequence(&der::oid(OID_DATA));

    let issuer_and_serial_seq = der::sequence(&[ias.issuer, ias.serial].concat());

    let mut signed_attrs_implicit = signed_attrs.to_vec();
    signed_attrs_implicit[0] = 0xa0;

    let signer_info = der::sequence(
        &[
            der::integer(1),
            issuer_and_serial_seq,
            digest_alg.clone(),
            signed_attrs_implicit,
            sig_alg,
            der::octet_string(signature),
        ]
        .concat(),
    );

    let signed_data = der::sequence(
        &[
            der::integer(1),
            der::set(&digest_alg),
            encap,
            // certificates [0] IMPLICIT, carrying the signing cert verbatim
            der::context(0, true, cert_der),
            der::set(&signer_info),
        ]
        .concat(),
    );

    Ok(der::sequence(
        &[der::oid(OID_SIGNED_DATA), der::context(0, true, &signed_data)].concat(),
    ))
}

// Attribute ::= SEQUENCE { attrType OID, attrValues SET OF AttributeValue }
fn attribute(attr_oid: &[u64], value: Vec<u8>) -> Vec<u8> {
    der::sequence(&[der::oid(attr_oid), der::set(&value)].concat())
}
