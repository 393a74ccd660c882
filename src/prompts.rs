//! Prompt sent to the generative backend.
//!
//! The prompt and the single-line JSON it asks for are the wire contract with
//! the model; field keys come from [`crate::schema`] so the two never drift.

use crate::schema::{Field, REQUIRED_FIELDS};

/// Sample values shown to the model, one per required field
fn sample_value(field: Field) -> &'static str {
    match field {
        Field::Name => "山田太郎",
        Field::Company => "株式会社サンプル",
        Field::Title => "営業部長",
        Field::Address => "東京都千代田区丸の内1-1-1",
        Field::PostalCode => "100-0001",
        Field::Phone => "03-1234-5678",
        Field::Email => "yamada@example.com",
        Field::EmailSecondary => "",
        Field::Website => "https://www.example.com",
        Field::PlatformUrl => "",
        Field::Other => "備考情報等",
        Field::PhoneSecondary => "",
    }
}

/// Single-line JSON example in schema order
fn sample_json_line() -> String {
    let pairs: Vec<String> = REQUIRED_FIELDS
        .iter()
        .map(|field| {
            format!(
                "{}: {}",
                serde_json::Value::from(field.primary_key()),
                serde_json::Value::from(sample_value(*field))
            )
        })
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Build the extraction prompt.
///
/// `platform_patterns` are the URL prefixes the model should route into the
/// platform URL field; `qr_text` is embedded when a QR code was decoded.
pub fn build_extraction_prompt(
    ocr_text: &str,
    qr_text: Option<&str>,
    platform_patterns: &[String],
) -> String {
    let keys: Vec<&str> = REQUIRED_FIELDS.iter().map(|f| f.primary_key()).collect();
    let platform_key = Field::PlatformUrl.primary_key();
    let other_key = Field::Other.primary_key();

    let mut prompt = String::new();
    prompt.push_str(
        "あなたは名刺（ビジネスカード）の情報を抽出するアシスタントです。\n\
         OCRで読み取った以下のテキストから連絡先情報を抽出してください。\n\n",
    );

    prompt.push_str("###抽出する項目###\n");
    prompt.push_str(&keys.join(", "));
    prompt.push_str("\n\n");

    prompt.push_str("###出力形式###\n");
    prompt.push_str("次のキーだけを持つ1行のJSONオブジェクトを出力してください：\n");
    prompt.push_str(&sample_json_line());
    prompt.push_str("\n\n");

    prompt.push_str("###ルール###\n");
    prompt.push_str("- 有効なJSONのみを出力し、前後に説明文やMarkdownを付けないでください。\n");
    prompt.push_str("- 出力は1行のJSONオブジェクトにしてください。\n");
    prompt.push_str("- キー名は上記のものを正確に使い、それ以外のキーを追加しないでください。\n");
    prompt.push_str("- 見つからない項目は空文字列\"\"にしてください。\n");
    if !platform_patterns.is_empty() {
        prompt.push_str(&format!(
            "- 「{}」には {} で始まるURLを入れてください。\n",
            platform_key,
            platform_patterns.join(" または ")
        ));
    }
    prompt.push_str(&format!(
        "- 備考、メモ、予備の電話番号やFAX、分類できない情報はすべて「{}」にまとめてください。\n\n",
        other_key
    ));

    if let Some(qr) = qr_text.filter(|t| !t.trim().is_empty()) {
        prompt.push_str("###QRコード###\n");
        prompt.push_str(qr);
        prompt.push_str("\n\n");
    }

    prompt.push_str("###OCRテキスト###\n");
    prompt.push_str(ocr_text);
    prompt.push('\n');

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Vec<String> {
        vec!["https://sasaeai.com/".to_string()]
    }

    #[test]
    fn test_prompt_lists_every_required_key() {
        let prompt = build_extraction_prompt("ACME", None, &patterns());
        for field in REQUIRED_FIELDS {
            assert!(
                prompt.contains(&format!("\"{}\"", field.primary_key())),
                "missing key {}",
                field.primary_key()
            );
        }
    }

    #[test]
    fn test_prompt_embeds_ocr_text_verbatim() {
        let ocr = "ACME Inc\n  John Doe\n03-1234-5678";
        let prompt = build_extraction_prompt(ocr, None, &patterns());
        assert!(prompt.ends_with(&format!("{}\n", ocr)));
        assert!(!prompt.contains("###QRコード###"));
    }

    #[test]
    fn test_prompt_includes_qr_payload() {
        let prompt =
            build_extraction_prompt("ACME", Some("https://sasaeai.com/p/1"), &patterns());
        assert!(prompt.contains("###QRコード###\nhttps://sasaeai.com/p/1"));
        assert!(prompt.contains("https://sasaeai.com/ で始まるURL"));
    }

    #[test]
    fn test_sample_line_is_valid_json() {
        let line = sample_json_line();
        assert!(!line.contains('\n'));
        let parsed: serde_json::Value =
            serde_json::from_str(&line).expect("sample should be valid JSON");
        assert_eq!(parsed.as_object().map(|o| o.len()), Some(REQUIRED_FIELDS.len()));
    }
}
