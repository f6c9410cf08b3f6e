//! Picks the characteristic print data is written to.
//!
//! Services are examined one at a time in discovery order and the first
//! characteristic with any write property wins. A characteristic that supports
//! acknowledged writes is used [`WriteMode::WithResponse`].

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::central::{Central, CharacteristicInfo, PeripheralInfo, WriteChannel, WriteMode};
use crate::error::PrinterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ignored,
    Waiting,
    Found(WriteChannel),
    Failed(PrinterError),
}

/// Resolution in progress for one connected peripheral.
pub struct CharacteristicResolver {
    peripheral: PeripheralInfo,
    /// Services not yet examined, front is the one being discovered.
    services: Vec<Uuid>,
    services_known: bool,
}

/// Writable channel for a characteristic, if it has a write property.
pub fn write_channel(characteristic: &CharacteristicInfo) -> Option<WriteChannel> {
    let props = characteristic.properties;
    let mode = if props.write {
        WriteMode::WithResponse
    } else if props.write_without_response {
        WriteMode::WithoutResponse
    } else {
        return None;
    };
    Some(WriteChannel {
        characteristic: characteristic.clone(),
        mode,
    })
}

impl CharacteristicResolver {
    /// Begin service discovery on `peripheral`.
    pub fn start<C: Central>(central: &mut C, peripheral: PeripheralInfo) -> Self {
        debug!("discovering services on {}", peripheral.label());
        central.discover_services(&peripheral);
        Self {
            peripheral,
            services: Vec::new(),
            services_known: false,
        }
    }

    pub fn on_services<C: Central>(
        &mut self,
        central: &mut C,
        peripheral_id: &str,
        result: Result<Vec<Uuid>, String>,
    ) -> Resolution {
        if peripheral_id != self.peripheral.id || self.services_known {
            return Resolution::Ignored;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                warn!("error discovering services on {}: {}", self.peripheral.label(), e);
                return Resolution::Failed(PrinterError::ServiceDiscoveryFailed(e));
            }
        };
        debug!("discovered services on {}: {:?}", self.peripheral.label(), services);
        self.services = services;
        self.services_known = true;
        self.next_service(central)
    }

    pub fn on_characteristics<C: Central>(
        &mut self,
        central: &mut C,
        peripheral_id: &str,
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, String>,
    ) -> Resolution {
        if peripheral_id != self.peripheral.id || self.services.first() != Some(&service) {
            return Resolution::Ignored;
        }
        self.services.remove(0);

        match result {
            Ok(characteristics) => {
                if let Some(channel) = characteristics.iter().find_map(write_channel) {
                    info!(
                        "using characteristic {} ({:?}) on {}",
                        channel.characteristic.uuid,
                        channel.mode,
                        self.peripheral.label()
                    );
                    return Resolution::Found(channel);
                }
                debug!("no writable characteristic in service {}", service);
            }
            // one bad service does not end the search
            Err(e) => warn!("error discovering characteristics for service {}: {}", service, e),
        }
        self.next_service(central)
    }

    fn next_service<C: Central>(&mut self, central: &mut C) -> Resolution {
        match self.services.first() {
            Some(&service) => {
                debug!("discovering characteristics for service {}", service);
                central.discover_characteristics(&self.peripheral, service);
                Resolution::Waiting
            }
            None => Resolution::Failed(PrinterError::NoWritableCharacteristic(
                self.peripheral.label().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::CharProps;
    use crate::central::mock::{Call, MockCentral};

    fn printer() -> PeripheralInfo {
        PeripheralInfo {
            id: "AA:01".into(),
            name: Some("MTP-II".into()),
        }
    }

    fn service(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn characteristic(service: Uuid, n: u128, write: bool, without: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: Uuid::from_u128(n),
            service,
            properties: CharProps {
                write,
                write_without_response: without,
            },
        }
    }

    #[test]
    fn test_first_writable_wins_in_discovery_order() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        let (s1, s2) = (service(1), service(2));

        assert_eq!(
            resolver.on_services(&mut central, "AA:01", Ok(vec![s1, s2])),
            Resolution::Waiting
        );
        // s1 has only a read characteristic
        let step = resolver.on_characteristics(
            &mut central,
            "AA:01",
            s1,
            Ok(vec![characteristic(s1, 10, false, false)]),
        );
        assert_eq!(step, Resolution::Waiting);

        let wanted = characteristic(s2, 20, false, true);
        let step = resolver.on_characteristics(
            &mut central,
            "AA:01",
            s2,
            Ok(vec![wanted.clone(), characteristic(s2, 21, true, true)]),
        );
        assert_eq!(
            step,
            Resolution::Found(WriteChannel {
                characteristic: wanted,
                mode: WriteMode::WithoutResponse,
            })
        );
        assert_eq!(
            central.take_calls(),
            vec![
                Call::DiscoverServices("AA:01".into()),
                Call::DiscoverCharacteristics("AA:01".into(), s1),
                Call::DiscoverCharacteristics("AA:01".into(), s2),
            ]
        );
    }

    #[test]
    fn test_with_response_preferred_on_same_characteristic() {
        let c = characteristic(service(1), 5, true, true);
        assert_eq!(write_channel(&c).map(|ch| ch.mode), Some(WriteMode::WithResponse));
        let c = characteristic(service(1), 5, false, false);
        assert_eq!(write_channel(&c), None);
    }

    #[test]
    fn test_service_error_does_not_abort() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        let (s1, s2) = (service(1), service(2));
        resolver.on_services(&mut central, "AA:01", Ok(vec![s1, s2]));

        let step = resolver.on_characteristics(&mut central, "AA:01", s1, Err("gatt error 0x0e".into()));
        assert_eq!(step, Resolution::Waiting);
        let step = resolver.on_characteristics(
            &mut central,
            "AA:01",
            s2,
            Ok(vec![characteristic(s2, 7, true, false)]),
        );
        assert!(matches!(step, Resolution::Found(WriteChannel { mode: WriteMode::WithResponse, .. })));
    }

    #[test]
    fn test_nothing_writable_after_all_services() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        let s1 = service(1);
        resolver.on_services(&mut central, "AA:01", Ok(vec![s1]));
        let step = resolver.on_characteristics(&mut central, "AA:01", s1, Ok(vec![]));
        assert_eq!(
            step,
            Resolution::Failed(PrinterError::NoWritableCharacteristic("MTP-II".into()))
        );
    }

    #[test]
    fn test_no_services() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        let step = resolver.on_services(&mut central, "AA:01", Ok(vec![]));
        assert!(matches!(step, Resolution::Failed(PrinterError::NoWritableCharacteristic(_))));
    }

    #[test]
    fn test_service_discovery_error() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        let step = resolver.on_services(&mut central, "AA:01", Err("not connected".into()));
        assert_eq!(
            step,
            Resolution::Failed(PrinterError::ServiceDiscoveryFailed("not connected".into()))
        );
    }

    #[test]
    fn test_events_for_other_peripheral_ignored() {
        let mut central = MockCentral::default();
        let mut resolver = CharacteristicResolver::start(&mut central, printer());
        assert_eq!(
            resolver.on_services(&mut central, "BB:02", Ok(vec![service(1)])),
            Resolution::Ignored
        );
        resolver.on_services(&mut central, "AA:01", Ok(vec![service(1)]));
        assert_eq!(
            resolver.on_characteristics(&mut central, "AA:01", service(9), Ok(vec![])),
            Resolution::Ignored
        );
    }
}
