//! Translation of platform records into the caller-facing wire shape.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use zeroconf_core::types::{DiscoveredRecord, ResolvedService};

/// A single field of a platform record that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot translate field '{field}' of {service}: {reason}")]
pub struct TranslationError {
    pub service: String,
    pub field: String,
    pub reason: String,
}

/// Converts a platform record into a [`ResolvedService`].
///
/// `domain` is reported as `suffix`, and `suffix` is stripped from the end of
/// the record's type. Attributes are decoded as UTF-8 one by one; a key whose
/// value is not valid UTF-8 is left out and the rest of the record is kept.
/// Unresolved records translate with no hostname, port 0 and no attributes.
pub fn translate(record: &DiscoveredRecord, suffix: &str) -> ResolvedService {
    let service_type = record
        .service_type
        .strip_suffix(suffix)
        .unwrap_or(&record.service_type)
        .to_string();

    let hostname = record.host.as_deref().and_then(last_host_component);

    let mut txt_record = BTreeMap::new();
    for (key, value) in &record.attributes {
        match decode_attribute(record, key, value) {
            Ok(text) => {
                txt_record.insert(key.clone(), text);
            }
            Err(err) => debug!(error = %err, "Dropping TXT attribute"),
        }
    }

    ResolvedService {
        domain: suffix.to_string(),
        service_type,
        name: record.name.clone(),
        port: record.port,
        hostname,
        txt_record,
    }
}

fn decode_attribute(
    record: &DiscoveredRecord,
    key: &str,
    value: &[u8],
) -> Result<String, TranslationError> {
    String::from_utf8(value.to_vec()).map_err(|e| TranslationError {
        service: record.identity().to_string(),
        field: format!("txtRecord.{}", key),
        reason: e.to_string(),
    })
}

/// `"printer.local/192.168.1.20"` → `"192.168.1.20"`.
fn last_host_component(host: &str) -> Option<String> {
    host.rsplit('/')
        .next()
        .filter(|component| !component.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_record() -> DiscoveredRecord {
        DiscoveredRecord {
            domain: "local.".to_string(),
            name: "Office Printer".to_string(),
            service_type: "_http._tcp.local.".to_string(),
            host: Some("printer.local/192.168.1.20".to_string()),
            port: 631,
            addresses: vec![],
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_suffix_moves_from_type_to_domain() {
        let service = translate(&resolved_record(), "local.");
        assert_eq!(service.domain, "local.");
        assert_eq!(service.service_type, "_http._tcp.");
        assert_eq!(service.name, "Office Printer");
        assert_eq!(service.port, 631);
    }

    #[test]
    fn test_type_without_suffix_is_unchanged() {
        let mut record = resolved_record();
        record.service_type = "_http._tcp.".to_string();
        assert_eq!(translate(&record, "local.").service_type, "_http._tcp.");
    }

    #[test]
    fn test_hostname_is_last_component() {
        let service = translate(&resolved_record(), "local.");
        assert_eq!(service.hostname.as_deref(), Some("192.168.1.20"));

        let mut bare = resolved_record();
        bare.host = Some("/10.0.0.7".to_string());
        assert_eq!(
            translate(&bare, "local.").hostname.as_deref(),
            Some("10.0.0.7")
        );

        let mut plain = resolved_record();
        plain.host = Some("printer.local".to_string());
        assert_eq!(
            translate(&plain, "local.").hostname.as_deref(),
            Some("printer.local")
        );
    }

    #[test]
    fn test_unresolved_record_has_no_hostname() {
        let record = DiscoveredRecord::unresolved("local.", "web", "_http._tcp.local.");
        let service = translate(&record, "local.");
        assert!(service.hostname.is_none());
        assert_eq!(service.port, 0);
        assert!(service.txt_record.is_empty());
    }

    #[test]
    fn test_invalid_utf8_attribute_is_dropped() {
        let mut record = resolved_record();
        record
            .attributes
            .insert("path".to_string(), b"/queue".to_vec());
        record
            .attributes
            .insert("blob".to_string(), vec![0xff, 0xfe, 0x00]);

        let service = translate(&record, "local.");
        assert_eq!(service.txt_record.len(), 1);
        assert_eq!(service.txt_record.get("path").map(String::as_str), Some("/queue"));
        assert!(!service.txt_record.contains_key("blob"));
    }

    #[test]
    fn test_empty_attribute_value_is_kept() {
        let mut record = resolved_record();
        record.attributes.insert("flag".to_string(), Vec::new());
        let service = translate(&record, "local.");
        assert_eq!(service.txt_record.get("flag").map(String::as_str), Some(""));
    }
}
