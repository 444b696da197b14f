use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ImageError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted key length, enforced at startup.
pub const MIN_KEY_LENGTH: usize = 32;

/// Verify the `sign` query parameter for a request: HMAC-SHA256 over the
/// request path concatenated with the canonical query (sorted keys, form
/// encoding, `sign` removed), compared in constant time against the
/// URL-safe base64 digest supplied by the client.
pub fn verify(
    key: &str,
    path: &str,
    query: &[(String, String)],
    sign: &str,
) -> Result<(), ImageError> {
    let digest = general_purpose::URL_SAFE_NO_PAD
        .decode(sign)
        .map_err(|_| ImageError::invalid_url_signature())?;

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| ImageError::invalid_url_signature())?;
    mac.update(path.as_bytes());
    mac.update(canonical_query(query).as_bytes());

    mac.verify_slice(&digest)
        .map_err(|_| ImageError::url_signature_mismatch())
}

/// Produce the signature for a path + query, used by tests and by operators
/// generating signed URLs out of band.
pub fn sign(key: &str, path: &str, query: &[(String, String)]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(path.as_bytes());
    mac.update(canonical_query(query).as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Form-encode the query pairs with keys sorted, excluding `sign` itself.
/// Values for a repeated key keep their original order.
fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> =
        query.iter().filter(|(key, _)| key != "sign").collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "4f46feebafc4b5e988f131c4ff8b5997";

    fn query(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let q = query(&[
            ("file", "image.jpg"),
            ("height", "200"),
            ("type", "jpeg"),
            ("width", "300"),
        ]);
        let signature = sign(KEY, "/resize", &q);
        assert!(verify(KEY, "/resize", &q, &signature).is_ok());
    }

    #[test]
    fn test_canonical_query_sorts_keys() {
        let shuffled = query(&[("width", "300"), ("file", "image.jpg"), ("height", "200")]);
        let sorted = query(&[("file", "image.jpg"), ("height", "200"), ("width", "300")]);
        assert_eq!(sign(KEY, "/resize", &shuffled), sign(KEY, "/resize", &sorted));
    }

    #[test]
    fn test_sign_param_excluded_from_canonical_form() {
        let q = query(&[("width", "300")]);
        let signature = sign(KEY, "/resize", &q);

        let mut with_sign = q.clone();
        with_sign.push(("sign".to_string(), signature.clone()));
        assert!(verify(KEY, "/resize", &with_sign, &signature).is_ok());
    }

    #[test]
    fn test_tampered_query_fails() {
        let q = query(&[("width", "300")]);
        let signature = sign(KEY, "/resize", &q);

        let tampered = query(&[("width", "301")]);
        let err = verify(KEY, "/resize", &tampered, &signature).unwrap_err();
        assert_eq!(err, ImageError::url_signature_mismatch());
    }

    #[test]
    fn test_tampered_path_fails() {
        let q = query(&[("width", "300")]);
        let signature = sign(KEY, "/resize", &q);
        assert!(verify(KEY, "/crop", &q, &signature).is_err());
    }

    #[test]
    fn test_undecodable_signature() {
        let err = verify(KEY, "/resize", &query(&[]), "not base64 !!!").unwrap_err();
        assert_eq!(err, ImageError::invalid_url_signature());
    }

    #[test]
    fn test_expected_digest_for_known_input() {
        // Same digest as HMAC-SHA256(key, "/resize" + canonical query).
        let q = query(&[
            ("file", "image.jpg"),
            ("height", "200"),
            ("type", "jpeg"),
            ("width", "300"),
        ]);
        let mut mac = HmacSha256::new_from_slice(KEY.as_bytes()).unwrap();
        mac.update(b"/resize");
        mac.update(b"file=image.jpg&height=200&type=jpeg&width=300");
        let expected = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        assert_eq!(sign(KEY, "/resize", &q), expected);
    }
}
