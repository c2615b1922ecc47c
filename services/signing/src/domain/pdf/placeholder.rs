// 署名プレースホルダの書き込み
//
// 既存のPDF本体には一切手を付けず、増分更新として署名辞書・
// ウィジェット注釈・クロスリファレンスとトレーラを末尾に追記する。
// /Contentsの穴と/ByteRangeスロットの位置を記録して返し、
// 後段のダイジェスト計算と署名埋め込みがその位置を使う。
// 要件: 3.1, 3.2, 3.6

use std::ops::Range;

use chrono::{DateTime, Utc};

use super::tail::{self, ObjRef, PdfError, TrailerInfo};

/// /Contentsの穴の容量（16進文字数）。DERはこの半分のバイト数まで
pub const CONTENTS_CAPACITY: usize = 8192;

// /ByteRangeプレースホルダ。byte_range::finalizeが同じ幅で上書きする
const BYTE_RANGE_SLOT: &str = "[0 0000000000 0000000000 0000000000]";

/// プレースホルダ書き込み済みの文書と、後段が使う位置情報
#[derive(Debug, Clone, PartialEq)]
pub struct PlantedDocument {
    pub bytes: Vec<u8>,
    /// /Contents値の開き'<'の位置
    pub contents_start: usize,
    /// /Contents値の閉じ'>'の直後
    pub contents_end: usize,
    /// /ByteRangeスロット（'['から']'まで）の範囲
    pub byte_range_slot: Range<usize>,
}

/// 署名辞書とウィジェット注釈を増分更新として追記する（要件 3.1）
///
/// ページ辞書に/Annotsが無ければページを再出力して追加し、
/// インライン配列なら配列に追記、間接参照なら参照先の配列
/// オブジェクトを再出力する。
pub fn plant(
    pdf: &[u8],
    name: &str,
    reason: &str,
    signing_time: DateTime<Utc>,
) -> Result<PlantedDocument, PdfError> {
    let info = tail::parse_tail(pdf)?;
    let sig_num = info.next_object;
    let annot_num = info.next_object + 1;

    let (modified_ref, modified_bytes) = attach_annotation(pdf, &info, annot_num)?;

    let mut out = pdf.to_vec();
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }

    let modified_offset = out.len();
    out.extend_from_slice(&modified_bytes);
    out.push(b'\n');

    // 署名辞書。/ByteRangeと/Contentsの位置を記録しながら書く
    let sig_offset = out.len();
    out.extend_from_slice(format!("{sig_num} 0 obj\n").as_bytes());
    out.extend_from_slice(
        b"<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached",
    );
    out.extend_from_slice(
        format!(
            " /Name ({}) /Reason ({}) /M (D:{})",
            escape_pdf_string(name),
            escape_pdf_string(reason),
            signing_time.format("%Y%m%d%H%M%SZ"),
        )
        .as_bytes(),
    );
    out.extend_from_slice(b" /ByteRange ");
    let byte_range_slot = out.len()..out.len() + BYTE_RANGE_SLOT.len();
    out.extend_from_slice(BYTE_RANGE_SLOT.as_bytes());
    out.extend_from_slice(b" /Contents ");
    let contents_start = out.len();
    out.push(b'<');
    out.resize(out.len() + CONTENTS_CAPACITY, b'0');
    out.push(b'>');
    let contents_end = out.len();
    out.extend_from_slice(b" >>\nendobj\n");

    // 署名ウィジェット注釈。Rect [0 0 0 0]の非表示注釈として付ける
    let annot_offset = out.len();
    out.extend_from_slice(
        format!(
            "{annot_num} 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Sig /Rect [0 0 0 0] /F 132 /T (Signature1) /V {sig_num} 0 R /P {} {} R >>\nendobj\n",
            info.first_page.number, info.first_page.generation,
        )
        .as_bytes(),
    );

    // クロスリファレンスとトレーラ
    let xref_offset = out.len();
    let mut entries = vec![
        (modified_ref.number, modified_ref.generation, modified_offset),
        (sig_num, 0u16, sig_offset),
        (annot_num, 0u16, annot_offset),
    ];
    entries.sort_by_key(|&(number, _, _)| number);
    out.extend_from_slice(b"xref\n");
    for (start, group) in subsections(&entries) {
        out.extend_from_slice(format!("{start} {}\n", group.len()).as_bytes());
        for &(_, generation, offset) in group {
            // エントリは20バイト固定（10桁オフセット、5桁世代、n、space+LF）
            out.extend_from_slice(format!("{offset:010} {generation:05} n \n").as_bytes());
        }
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} {} R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
            annot_num + 1,
            info.root.number,
            info.root.generation,
            info.prev_xref,
            xref_offset,
        )
        .as_bytes(),
    );

    Ok(PlantedDocument {
        bytes: out,
        contents_start,
        contents_end,
        byte_range_slot,
    })
}

/// 署名DERを/Contentsの穴に大文字16進で書き込む（要件 3.6）
///
/// 穴の残りは0のまま。文書長は変わらない。
pub fn embed_signature(
    planted: &mut PlantedDocument,
    signature_der: &[u8],
) -> Result<(), PdfError> {
    let encoded = hex::encode_upper(signature_der);
    if encoded.len() > CONTENTS_CAPACITY {
        return Err(PdfError::SignatureTooLarge {
            size: signature_der.len(),
            capacity: CONTENTS_CAPACITY / 2,
        });
    }
    let start = planted.contents_start + 1;
    planted.bytes[start..start + encoded.len()].copy_from_slice(encoded.as_bytes());
    Ok(())
}

// 注釈参照の追記先オブジェクトを決めて再出力する
fn attach_annotation(
    pdf: &[u8],
    info: &TrailerInfo,
    annot_num: u32,
) -> Result<(ObjRef, Vec<u8>), PdfError> {
    let page = info.first_page;
    let page_span =
        tail::find_object_span(pdf, page).ok_or(PdfError::ObjectNotFound(page.number))?;
    let page_dict =
        tail::object_dict(pdf, &page_span).ok_or(PdfError::MalformedObject(page.number))?;
    let dict_src = &pdf[page_dict.clone()];
    let annot_ref_text = format!("{annot_num} 0 R");

    let Some(after_key) = tail::find_name_key(dict_src, b"/Annots") else {
        // /Annotsキーを辞書の閉じ括弧の直前に挿入する
        let insert_at = page_dict.end - 2 - page_span.start;
        let insert = format!(" /Annots [{annot_ref_text}]");
        return Ok((
            page,
            splice(&pdf[page_span.clone()], insert_at, insert.as_bytes()),
        ));
    };

    let mut p = page_dict.start + after_key;
    while pdf.get(p).copied().is_some_and(tail::is_pdf_whitespace) {
        p += 1;
    }
    if pdf.get(p) == Some(&b'[') {
        // インライン配列: 閉じ']'の直前に追記
        let close =
            matching_bracket(pdf, p, page_dict.end).ok_or(PdfError::MalformedObject(page.number))?;
        let insert_at = close - page_span.start;
        let insert = format!(" {annot_ref_text}");
        Ok((
            page,
            splice(&pdf[page_span.clone()], insert_at, insert.as_bytes()),
        ))
    } else {
        // 間接参照: 参照先の配列オブジェクトを再出力する
        let mut pos = p;
        let array_ref =
            tail::parse_ref(pdf, &mut pos).ok_or(PdfError::MalformedObject(page.number))?;
        let array_span = tail::find_object_span(pdf, array_ref)
            .ok_or(PdfError::ObjectNotFound(array_ref.number))?;
        let src = &pdf[array_span];
        let close = src
            .iter()
            .rposition(|&b| b == b']')
            .ok_or(PdfError::MalformedObject(array_ref.number))?;
        let insert = format!(" {annot_ref_text}");
        Ok((array_ref, splice(src, close, insert.as_bytes())))
    }
}

// 開き'['に対応する']'の位置（limit未満）
fn matching_bracket(buf: &[u8], open: usize, limit: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in buf.iter().enumerate().take(limit.min(buf.len())).skip(open) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn splice(src: &[u8], at: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + insert.len());
    out.extend_from_slice(&src[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&src[at..]);
    out
}

// PDFリテラル文字列のエスケープ
fn escape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

// 番号順のエントリを連番ごとのxrefサブセクションにまとめる
fn subsections(entries: &[(u32, u16, usize)]) -> Vec<(u32, &[(u32, u16, usize)])> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0 != entries[i - 1].0 + 1 {
            out.push((entries[start].0, &entries[start..i]));
            start = i;
        }
    }
    out
}
