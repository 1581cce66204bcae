//! Candidate matching rules
//!
//! BLE takes the first advertised name containing the filter, in the order
//! the scan reported them. Serial insists on exactly one matching port and
//! treats several as ambiguous so the user can pick. Keep the two rules apart
//! unless both firmwares change how they identify themselves.

use super::error::DiscoveryError;

/// A serial port as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// Port path, e.g. `COM3` or `/dev/ttyACM0`
    pub name: String,
    /// Human-readable description matched against the marker
    pub description: String,
}

/// First candidate whose name contains `filter`; unnamed candidates never match
pub fn first_name_match<T, I>(candidates: I, filter: &str) -> Option<T>
where
    I: IntoIterator<Item = (T, Option<String>)>,
{
    candidates
        .into_iter()
        .find(|(_, name)| name.as_deref().is_some_and(|n| n.contains(filter)))
        .map(|(candidate, _)| candidate)
}

/// The single port whose description contains `marker`
pub fn unique_port_match(
    candidates: &[PortCandidate],
    marker: &str,
) -> Result<PortCandidate, DiscoveryError> {
    let matching: Vec<&PortCandidate> = candidates
        .iter()
        .filter(|c| c.description.contains(marker))
        .collect();

    match matching.as_slice() {
        [] => Err(DiscoveryError::NotFound {
            filter: marker.to_string(),
        }),
        [only] => Ok((*only).clone()),
        many => Err(DiscoveryError::Ambiguous {
            filter: marker.to_string(),
            candidates: many.iter().map(|c| c.name.clone()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, description: &str) -> PortCandidate {
        PortCandidate {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    fn named(addr: &str, name: Option<&str>) -> (String, Option<String>) {
        (addr.to_string(), name.map(str::to_string))
    }

    #[test]
    fn test_ble_no_match() {
        let seen = vec![named("AA", Some("headphones")), named("BB", None)];
        assert_eq!(first_name_match(seen, "busy_light_"), None);
    }

    #[test]
    fn test_ble_single_match() {
        let seen = vec![named("AA", Some("headphones")), named("BB", Some("busy_light_01"))];
        assert_eq!(first_name_match(seen, "busy_light_"), Some("BB".to_string()));
    }

    #[test]
    fn test_ble_first_seen_wins() {
        let seen = vec![
            named("AA", None),
            named("BB", Some("busy_light_02")),
            named("CC", Some("busy_light_01")),
        ];
        assert_eq!(first_name_match(seen, "busy_light_"), Some("BB".to_string()));
    }

    #[test]
    fn test_serial_no_match() {
        let ports = vec![port("COM1", "Communications Port")];
        let err = unique_port_match(&ports, "USB").unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound { .. }));
    }

    #[test]
    fn test_serial_single_match() {
        let ports = vec![
            port("COM1", "Communications Port"),
            port("COM3", "USB Serial Device"),
        ];
        let found = unique_port_match(&ports, "USB").unwrap();
        assert_eq!(found.name, "COM3");
    }

    #[test]
    fn test_serial_multiple_matches_are_ambiguous() {
        let ports = vec![
            port("COM3", "USB Serial Device"),
            port("COM4", "USB-SERIAL CH340"),
        ];
        match unique_port_match(&ports, "USB") {
            Err(DiscoveryError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates, vec!["COM3".to_string(), "COM4".to_string()]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }
}
