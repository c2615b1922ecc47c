// PDF末尾（トレーラ）の解析
//
// 増分更新に必要な情報だけをバイト列走査で取り出す寛容なパーサ。
// 完全なPDFパーサではない。クロスリファレンスストリーム形式のように
// trailerキーワードを持たないファイルでも、/Rootと/Sizeの走査と
// ページオブジェクトのスキャンでフォールバックする。
// 要件: 3.1

use std::ops::Range;

use thiserror::Error;

/// PDF署名埋め込みのエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PdfError {
    /// 先頭に%PDF-ヘッダがない
    #[error("missing %PDF- header")]
    MissingHeader,
    /// startxrefが見つからない
    #[error("startxref not found")]
    MissingStartxref,
    /// ルートカタログへの参照が見つからない
    #[error("root catalog reference not found")]
    MissingRoot,
    /// ページオブジェクトが見つからない
    #[error("no page object found")]
    MissingPage,
    /// 参照先のオブジェクトが存在しない
    #[error("object {0} not found")]
    ObjectNotFound(u32),
    /// オブジェクトの辞書・配列が解析できない
    #[error("object {0} is malformed")]
    MalformedObject(u32),
    /// 署名DERがプレースホルダ容量を超えた
    #[error("signature of {size} bytes exceeds placeholder capacity of {capacity} bytes")]
    SignatureTooLarge { size: usize, capacity: usize },
    /// ByteRange値が予約スロットの幅を超えた
    #[error("byte range value exceeds the reserved slot width")]
    ByteRangeOverflow,
    /// ByteRangeが文書の範囲外
    #[error("byte range is outside the document")]
    InvalidByteRange,
}

/// 間接オブジェクト参照（N G R）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef {
    pub number: u32,
    pub generation: u16,
}

/// 増分更新の組み立てに必要なトレーラ情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerInfo {
    /// 既存startxrefの値。増分更新トレーラの/Prevになる
    pub prev_xref: u64,
    /// ルートカタログ
    pub root: ObjRef,
    /// 次に使える空きオブジェクト番号
    pub next_object: u32,
    /// 署名ウィジェットを付けるページ
    pub first_page: ObjRef,
}

// ページツリー探索の深さ上限（循環参照対策）
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// 文書末尾を解析してトレーラ情報を返す
///
/// /Rootと/Sizeはファイル末尾側の出現を優先する（増分更新で
/// 後のトレーラが前のものを上書きするため）。/Sizeが無い場合は
/// オブジェクトヘッダの走査で次番号を決める。
pub fn parse_tail(pdf: &[u8]) -> Result<TrailerInfo, PdfError> {
    if !pdf.starts_with(b"%PDF-") {
        return Err(PdfError::MissingHeader);
    }
    let prev_xref = rscan(pdf, b"startxref", parse_uint).ok_or(PdfError::MissingStartxref)?;
    let root = rscan(pdf, b"/Root", parse_ref).ok_or(PdfError::MissingRoot)?;
    let next_object = match rscan(pdf, b"/Size", parse_uint).and_then(|s| u32::try_from(s).ok()) {
        Some(size) if size > 0 => size,
        _ => max_object_number(pdf)
            .map(|n| n + 1)
            .ok_or(PdfError::MissingPage)?,
    };
    let first_page = find_first_page(pdf, root).ok_or(PdfError::MissingPage)?;
    Ok(TrailerInfo {
        prev_xref,
        root,
        next_object,
        first_page,
    })
}

/// オブジェクトの出現範囲（ヘッダからendobjまで）を返す
///
/// 増分更新では同じ番号のオブジェクトが複数回現れるため、
/// 最後（=最新）の出現を採用する。
pub(crate) fn find_object_span(pdf: &[u8], obj: ObjRef) -> Option<Range<usize>> {
    let header = format!("{} {} obj", obj.number, obj.generation);
    let needle = header.as_bytes();
    let mut window = pdf.len();
    loop {
        let at = rfind(&pdf[..window], needle)?;
        // "12 0 obj"が"112 0 obj"に一致しないようトークン境界を確認
        let before_ok = at == 0 || is_pdf_whitespace(pdf[at - 1]) || is_pdf_delimiter(pdf[at - 1]);
        let after = at + needle.len();
        let after_ok = pdf
            .get(after)
            .is_none_or(|&b| is_pdf_whitespace(b) || is_pdf_delimiter(b));
        if before_ok && after_ok
            && let Some(end) = find_from(pdf, b"endobj", after)
        {
            return Some(at..end + b"endobj".len());
        }
        if at == 0 {
            return None;
        }
        window = at;
    }
}

/// オブジェクト範囲内の最初の辞書（<< >>のバランスを取った範囲）
pub(crate) fn object_dict(pdf: &[u8], span: &Range<usize>) -> Option<Range<usize>> {
    let open = find_from(pdf, b"<<", span.start)?;
    if open >= span.end {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open;
    while i + 1 < span.end {
        if pdf[i] == b'<' && pdf[i + 1] == b'<' {
            depth += 1;
            i += 2;
            continue;
        }
        if pdf[i] == b'>' && pdf[i + 1] == b'>' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(open..i);
            }
            continue;
        }
        i += 1;
    }
    None
}

/// 辞書ソース内の名前キーを探し、キー直後のインデックスを返す
///
/// キーの直後がデリミタか空白であることを確認する
/// （/Typeが/TypeXに一致しないように）。
pub(crate) fn find_name_key(dict: &[u8], key: &[u8]) -> Option<usize> {
    let mut search = 0;
    while let Some(at) = find_from(dict, key, search) {
        search = at + 1;
        let after = at + key.len();
        if dict
            .get(after)
            .is_none_or(|&b| is_pdf_whitespace(b) || is_pdf_delimiter(b))
        {
            return Some(after);
        }
    }
    None
}

pub(crate) fn is_pdf_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\x00')
}

pub(crate) fn is_pdf_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// 間接参照（N G R）をパースする。成功時はposを参照の直後へ進める
pub(crate) fn parse_ref(buf: &[u8], pos: &mut usize) -> Option<ObjRef> {
    let mut p = *pos;
    let number = parse_uint(buf, &mut p)?;
    let generation = parse_uint(buf, &mut p)?;
    while buf.get(p).copied().is_some_and(is_pdf_whitespace) {
        p += 1;
    }
    if buf.get(p) != Some(&b'R') {
        return None;
    }
    *pos = p + 1;
    Some(ObjRef {
        number: u32::try_from(number).ok()?,
        generation: u16::try_from(generation).ok()?,
    })
}

fn parse_uint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut p = *pos;
    while buf.get(p).copied().is_some_and(is_pdf_whitespace) {
        p += 1;
    }
    let start = p;
    while buf.get(p).copied().is_some_and(|b| b.is_ascii_digit()) {
        p += 1;
    }
    if p == start {
        return None;
    }
    let value = std::str::from_utf8(&buf[start..p]).ok()?.parse().ok()?;
    *pos = p;
    Some(value)
}

// keyの出現を末尾から順に試し、後続をパースできた最初の結果を返す
fn rscan<T, F>(pdf: &[u8], key: &[u8], parse: F) -> Option<T>
where
    F: Fn(&[u8], &mut usize) -> Option<T>,
{
    let mut window = pdf.len();
    loop {
        let at = rfind(&pdf[..window], key)?;
        let mut pos = at + key.len();
        if let Some(value) = parse(pdf, &mut pos) {
            return Some(value);
        }
        if at == 0 {
            return None;
        }
        window = at;
    }
}

fn rfind(buf: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || buf.len() < needle.len() {
        return None;
    }
    (0..=buf.len() - needle.len()).rev().find(|&i| &buf[i..i + needle.len()] == needle)
}

fn find_from(buf: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || buf.len() < start + needle.len() {
        return None;
    }
    buf[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| start + i)
}

// 全オブジェクトヘッダ（N G obj）の番号と開始位置
fn object_headers(pdf: &[u8]) -> Vec<(ObjRef, usize)> {
    let mut out = Vec::new();
    let mut search = 0;
    while let Some(at) = find_from(pdf, b"obj", search) {
        search = at + 3;
        // endobjや名前の一部（/XObject等）を除外
        if pdf
            .get(at + 3)
            .is_some_and(|b| b.is_ascii_alphanumeric())
        {
            continue;
        }
        if let Some(header) = parse_header_backwards(pdf, at) {
            out.push(header);
        }
    }
    out
}

// "obj"キーワード位置から後方に「番号 世代」を読み取る
fn parse_header_backwards(pdf: &[u8], obj_kw: usize) -> Option<(ObjRef, usize)> {
    let mut i = obj_kw;
    let ws_end = i;
    while i > 0 && is_pdf_whitespace(pdf[i - 1]) {
        i -= 1;
    }
    if i == ws_end {
        return None;
    }
    let gen_end = i;
    while i > 0 && pdf[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == gen_end {
        return None;
    }
    let generation: u16 = std::str::from_utf8(&pdf[i..gen_end]).ok()?.parse().ok()?;
    let ws2_end = i;
    while i > 0 && is_pdf_whitespace(pdf[i - 1]) {
        i -= 1;
    }
    if i == ws2_end {
        return None;
    }
    let num_end = i;
    while i > 0 && pdf[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == num_end {
        return None;
    }
    let number: u32 = std::str::from_utf8(&pdf[i..num_end]).ok()?.parse().ok()?;
    if i > 0 && !is_pdf_whitespace(pdf[i - 1]) && !is_pdf_delimiter(pdf[i - 1]) {
        return None;
    }
    Some((ObjRef { number, generation }, i))
}

fn max_object_number(pdf: &[u8]) -> Option<u32> {
    object_headers(pdf).iter().map(|(obj, _)| obj.number).max()
}

fn find_first_page(pdf: &[u8], root: ObjRef) -> Option<ObjRef> {
    walk_page_tree(pdf, root).or_else(|| scan_for_page_object(pdf))
}

// カタログ → /Pages → /Kidsの先頭を辿って最初のページに到達する
fn walk_page_tree(pdf: &[u8], root: ObjRef) -> Option<ObjRef> {
    let root_span = find_object_span(pdf, root)?;
    let root_dict = object_dict(pdf, &root_span)?;
    let pages_at = find_name_key(&pdf[root_dict.clone()], b"/Pages")?;
    let mut pos = root_dict.start + pages_at;
    let mut node = parse_ref(pdf, &mut pos)?;

    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let span = find_object_span(pdf, node)?;
        let dict = object_dict(pdf, &span)?;
        let dict_src = &pdf[dict.clone()];
        let Some(kids_at) = find_name_key(dict_src, b"/Kids") else {
            // 葉ノード。/Type /Pageであることを確認
            return has_page_type(dict_src).then_some(node);
        };
        let mut p = dict.start + kids_at;
        while pdf.get(p).copied().is_some_and(is_pdf_whitespace) {
            p += 1;
        }
        if pdf.get(p) != Some(&b'[') {
            return None;
        }
        p += 1;
        node = parse_ref(pdf, &mut p)?;
    }
    None
}

// ツリーが辿れない場合の最終手段: /Type /Pageを持つオブジェクトを先頭から探す
fn scan_for_page_object(pdf: &[u8]) -> Option<ObjRef> {
    for (obj, start) in object_headers(pdf) {
        let Some(end) = find_from(pdf, b"endobj", start) else {
            continue;
        };
        let span = start..end + b"endobj".len();
        let Some(dict) = object_dict(pdf, &span) else {
            continue;
        };
        if has_page_type(&pdf[dict]) {
            return Some(obj);
        }
    }
    None
}

// /Type /Pageか（/Pagesには一致しない）
fn has_page_type(dict: &[u8]) -> bool {
    let Some(after) = find_name_key(dict, b"/Type") else {
        return false;
    };
    let mut p = after;
    while dict.get(p).copied().is_some_and(is_pdf_whitespace) {
        p += 1;
    }
    dict[p..].starts_with(b"/Page")
        && dict
            .get(p + b"/Page".len())
            .is_none_or(|&b| is_pdf_whitespace(b) || is_pdf_delimiter(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    // オフセットを計算しながら最小構成のPDFを組み立てる
    fn minimal_pdf() -> Vec<u8> {
        build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ])
    }

    // 各辞書を1始まりのオブジェクトとして並べ、クラシックxrefを付ける
    fn build_pdf(objects: &[&str]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.7\n");
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_off = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for off in &offsets {
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_off
            )
            .as_bytes(),
        );
        out
    }

    fn xref_offset_of(pdf: &[u8]) -> u64 {
        rscan(pdf, b"startxref", parse_uint).unwrap()
    }

    // ==================== 3.1 トレーラ解析テスト ====================

    /// 最小構成のPDFを解析できる
    #[test]
    fn test_parse_tail_minimal_pdf() {
        let pdf = minimal_pdf();
        let info = parse_tail(&pdf).unwrap();
        assert_eq!(info.prev_xref, xref_offset_of(&pdf));
        assert_eq!(info.root, ObjRef { number: 1, generation: 0 });
        assert_eq!(info.next_object, 4);
        assert_eq!(info.first_page, ObjRef { number: 3, generation: 0 });
    }

    /// %PDF-ヘッダが無ければエラー
    #[test]
    fn test_parse_tail_missing_header() {
        assert_eq!(
            parse_tail(b"not a pdf at all"),
            Err(PdfError::MissingHeader)
        );
    }

    /// startxrefが無ければエラー
    #[test]
    fn test_parse_tail_missing_startxref() {
        assert_eq!(
            parse_tail(b"%PDF-1.7\n1 0 obj\n<< >>\nendobj\n"),
            Err(PdfError::MissingStartxref)
        );
    }

    /// 末尾の改行が無くても解析できる
    #[test]
    fn test_parse_tail_without_trailing_newline() {
        let mut pdf = minimal_pdf();
        while pdf.last() == Some(&b'\n') {
            pdf.pop();
        }
        let info = parse_tail(&pdf).unwrap();
        assert_eq!(info.first_page.number, 3);
    }

    /// trailerキーワードが無い形式（クロスリファレンスストリーム相当）でも
    /// /Rootと/Sizeの走査で解析できる
    #[test]
    fn test_parse_tail_without_trailer_keyword() {
        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.7\n");
        out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        out.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");
        let stream_off = out.len();
        out.extend_from_slice(
            b"4 0 obj\n<< /Type /XRef /Size 5 /Root 1 0 R /W [1 2 1] >>\nstream\nendstream\nendobj\n",
        );
        out.extend_from_slice(format!("startxref\n{stream_off}\n%%EOF\n").as_bytes());

        let info = parse_tail(&out).unwrap();
        assert_eq!(info.prev_xref, stream_off as u64);
        assert_eq!(info.root.number, 1);
        assert_eq!(info.next_object, 5);
        assert_eq!(info.first_page.number, 3);
    }

    /// /Sizeが無ければオブジェクト番号の走査で次番号を決める
    #[test]
    fn test_parse_tail_size_fallback() {
        let mut pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ]);
        // トレーラから/Sizeを取り除く
        let text = String::from_utf8(pdf.clone()).unwrap();
        let replaced = text.replace("/Size 4 ", "");
        pdf = replaced.into_bytes();
        let info = parse_tail(&pdf).unwrap();
        assert_eq!(info.next_object, 4);
    }

    /// 中間Pagesノードを挟んだツリーを辿れる
    #[test]
    fn test_parse_tail_nested_page_tree() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [4 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 4 0 R >>",
            "<< /Type /Pages /Parent 2 0 R /Kids [3 0 R] /Count 1 >>",
        ]);
        let info = parse_tail(&pdf).unwrap();
        assert_eq!(info.first_page.number, 3);
    }

    /// カタログに/Pagesが無くてもページスキャンで見つける
    #[test]
    fn test_parse_tail_page_scan_fallback() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ]);
        let info = parse_tail(&pdf).unwrap();
        // /Type /Pagesのオブジェクト2ではなくオブジェクト3が選ばれる
        assert_eq!(info.first_page.number, 3);
    }

    /// ページが1つも無ければエラー
    #[test]
    fn test_parse_tail_no_page() {
        let pdf = build_pdf(&["<< /Type /Catalog >>", "<< /Length 0 >>"]);
        assert_eq!(parse_tail(&pdf), Err(PdfError::MissingPage));
    }

    // ==================== オブジェクト走査テスト ====================

    /// find_object_spanはヘッダからendobjまでを返す
    #[test]
    fn test_find_object_span() {
        let pdf = minimal_pdf();
        let span = find_object_span(&pdf, ObjRef { number: 3, generation: 0 }).unwrap();
        let src = &pdf[span];
        assert!(src.starts_with(b"3 0 obj"));
        assert!(src.ends_with(b"endobj"));
    }

    /// 増分更新で同じ番号が複数ある場合は最後の出現を返す
    #[test]
    fn test_find_object_span_prefers_last_occurrence() {
        let mut pdf = minimal_pdf();
        let update_off = pdf.len();
        pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Rotate 90 >>\nendobj\n");
        let span = find_object_span(&pdf, ObjRef { number: 3, generation: 0 }).unwrap();
        assert_eq!(span.start, update_off);
    }

    /// "13 0 obj"の検索が"3 0 obj"に一致しない
    #[test]
    fn test_find_object_span_token_boundary() {
        let pdf = b"%PDF-1.7\n13 0 obj\n<< >>\nendobj\n".to_vec();
        assert!(find_object_span(&pdf, ObjRef { number: 3, generation: 0 }).is_none());
        assert!(find_object_span(&pdf, ObjRef { number: 13, generation: 0 }).is_some());
    }

    /// 入れ子の辞書でもバランスを取って範囲を返す
    #[test]
    fn test_object_dict_nested() {
        let pdf = b"1 0 obj\n<< /A << /B 1 >> /C 2 >>\nendobj\n".to_vec();
        let span = 0..pdf.len();
        let dict = object_dict(&pdf, &span).unwrap();
        assert_eq!(&pdf[dict], b"<< /A << /B 1 >> /C 2 >>");
    }

    /// find_name_keyはキー境界を確認する
    #[test]
    fn test_find_name_key_boundary() {
        let dict = b"<< /Pages 2 0 R /Page 3 0 R >>";
        // /Pageは/Pagesに一致しない
        let at = find_name_key(dict, b"/Page").unwrap();
        assert_eq!(&dict[at - b"/Page".len()..at], b"/Page");
        assert_eq!(dict[at], b' ');
        assert_eq!(&dict[at + 1..at + 6], b"3 0 R");
    }

    /// 間接参照のパース
    #[test]
    fn test_parse_ref() {
        let buf = b"  12 0 R rest";
        let mut pos = 0;
        let r = parse_ref(buf, &mut pos).unwrap();
        assert_eq!(r, ObjRef { number: 12, generation: 0 });
        assert_eq!(&buf[pos..], b" rest");
    }

    /// Rが無ければパース失敗
    #[test]
    fn test_parse_ref_rejects_plain_numbers() {
        let buf = b"12 0 /Next";
        let mut pos = 0;
        assert!(parse_ref(buf, &mut pos).is_none());
    }
}
