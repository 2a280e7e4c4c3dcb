//! Binary GUID conversion
//!
//! SAP services expose 16-byte GUIDs as base64-encoded `Edm.Binary` values.
//! These helpers convert between that wire form and the canonical hyphenated
//! GUID string. Canonical form is uppercase hex.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::odata::metadata::EntityProperty;
use crate::odata::types::EdmType;

/// Name fragments that mark a 16-byte binary property as GUID-shaped.
const GUID_NAME_MARKERS: [&str; 4] = ["ID", "GUID", "F", "T"];

/// Whether a property should be treated as a GUID: declared `Edm.Guid`, or
/// `Edm.Binary` with `MaxLength=16` and a GUID-ish name.
pub fn is_guid_shaped(prop: &EntityProperty) -> bool {
    match EdmType::from_edm(&prop.edm_type) {
        EdmType::Guid => true,
        EdmType::Binary => {
            prop.max_length == Some(16) && {
                let upper = prop.name.to_uppercase();
                GUID_NAME_MARKERS.iter().any(|m| upper.contains(m))
            }
        }
        _ => false,
    }
}

/// Convert a base64-encoded 16-byte value to `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
/// Returns `None` unless the input is exactly 24 base64 characters decoding
/// to exactly 16 bytes.
pub fn base64_to_guid(raw: &str) -> Option<String> {
    if raw.len() != 24 {
        return None;
    }
    let bytes = BASE64.decode(raw).ok()?;
    if bytes.len() != 16 {
        return None;
    }
    let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    Some(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Convert a canonical hyphenated GUID back to its base64 wire form.
/// Returns `None` if the input is not a 36-character GUID literal.
pub fn guid_to_base64(raw: &str) -> Option<String> {
    if raw.len() != 36 {
        return None;
    }
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 5
        || parts[0].len() != 8
        || parts[1].len() != 4
        || parts[2].len() != 4
        || parts[3].len() != 4
        || parts[4].len() != 12
    {
        return None;
    }
    let hex: String = parts.concat();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut bytes = Vec::with_capacity(16);
    for i in (0..32).step_by(2) {
        bytes.push(u8::from_str_radix(&hex[i..i + 2], 16).ok()?);
    }
    Some(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_prop(name: &str, max_length: Option<u32>) -> EntityProperty {
        let mut p = EntityProperty::new(name, "Edm.Binary");
        p.max_length = max_length;
        p
    }

    #[test]
    fn test_base64_to_guid_known_value() {
        assert_eq!(
            base64_to_guid("AkkEEAAEH9CL4dDCiWvlwg==").unwrap(),
            "02490410-0004-1FD0-8BE1-D0C2896BE5C2"
        );
    }

    #[test]
    fn test_guid_round_trip() {
        let b64 = "AkkEEAAEH9CL4dDCiWvlwg==";
        let guid = base64_to_guid(b64).unwrap();
        assert_eq!(guid_to_base64(&guid).unwrap(), b64);
    }

    #[test]
    fn test_lowercase_guid_converts_too() {
        let b64 = guid_to_base64("02490410-0004-1fd0-8be1-d0c2896be5c2").unwrap();
        assert_eq!(b64, "AkkEEAAEH9CL4dDCiWvlwg==");
    }

    #[test]
    fn test_rejects_wrong_lengths() {
        assert!(base64_to_guid("AkkEEA==").is_none());
        assert!(base64_to_guid("not base64 at all, nope!").is_none());
        assert!(guid_to_base64("02490410").is_none());
        assert!(guid_to_base64("02490410-0004-1FD0-8BE1-D0C2896BE5ZZ").is_none());
    }

    #[test]
    fn test_guid_shape_predicate() {
        let mut guid_prop = EntityProperty::new("AnyName", "Edm.Guid");
        guid_prop.max_length = None;
        assert!(is_guid_shaped(&guid_prop));

        assert!(is_guid_shaped(&binary_prop("Id", Some(16))));
        assert!(is_guid_shaped(&binary_prop("ParentGuid", Some(16))));
        assert!(is_guid_shaped(&binary_prop("F", Some(16))));
        // Wrong max length
        assert!(!is_guid_shaped(&binary_prop("Id", Some(32))));
        assert!(!is_guid_shaped(&binary_prop("Id", None)));
        // No GUID-ish marker in the name
        assert!(!is_guid_shaped(&binary_prop("Raw", Some(16))));
        // Plain strings never match
        assert!(!is_guid_shaped(&EntityProperty::new("Id", "Edm.String")));
    }
}
