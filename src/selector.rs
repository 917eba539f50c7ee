//! Card discovery and acquisition.
//!
//! [`CardSelector`] finds cards on the local bus or over ethernet, acquires
//! them for exclusive use and hands out a [`ScanContext`] per card. All
//! contexts created by one selector share its [`CardRegistry`].
//!
//! [`CardSelector::acquire_from_preset`] brings a card into a markable state
//! from a [`ConfigurationPreset`]. Cards whose firmware is not loaded yet
//! report serial number 0; when the wanted serial is not found on the first
//! pass, firmware is uploaded into those cards and their serial numbers are
//! read again.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capabilities::CardCapabilities;
use crate::card::{CardRecord, CardRegistry, NetworkAddress};
use crate::config::{parse_netmask, ConfigurationPreset};
use crate::context::ScanContext;
use crate::error::{ScanError, ScanResult};
use crate::hardware::{FirmwareImage, RtcTransport};
use crate::resources::ResourceProvider;

/// Entry point for acquiring cards.
pub struct CardSelector {
    transport: Arc<dyn RtcTransport>,
    cards: Arc<CardRegistry>,
    capabilities: CardCapabilities,
}

impl std::fmt::Debug for CardSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardSelector")
            .field("transport", &self.transport.name())
            .field("cards", &self.cards.len())
            .field("family", &self.capabilities.family)
            .finish()
    }
}

impl CardSelector {
    /// Selector with its own card registry.
    pub fn new(transport: Arc<dyn RtcTransport>, capabilities: CardCapabilities) -> Self {
        Self::with_registry(transport, CardRegistry::new(), capabilities)
    }

    /// Selector sharing an existing card registry.
    pub fn with_registry(
        transport: Arc<dyn RtcTransport>,
        cards: Arc<CardRegistry>,
        capabilities: CardCapabilities,
    ) -> Self {
        Self {
            transport,
            cards,
            capabilities,
        }
    }

    /// Arena shared by every card this selector acquires.
    pub fn registry(&self) -> &Arc<CardRegistry> {
        &self.cards
    }

    /// Capabilities handed to acquired contexts.
    pub fn capabilities(&self) -> &CardCapabilities {
        &self.capabilities
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Number of locally attached cards.
    pub fn card_count(&self) -> ScanResult<u32> {
        self.transport.init()?;
        Ok(self.transport.count_cards())
    }

    /// Search ethernet cards in the subnet of `ip`.
    pub fn search_cards(&self, ip: &str, netmask: &str, timeout_ms: u32) -> ScanResult<u32> {
        let ip = parse_ip(ip)?;
        let netmask = parse_netmask(netmask)?;
        self.search_network(NetworkAddress { ip, netmask }, timeout_ms)
    }

    /// Search ethernet cards between two addresses.
    pub fn search_cards_by_range(&self, start: &str, end: &str, timeout_ms: u32) -> ScanResult<u32> {
        let start = parse_ip(start)?;
        let end = parse_ip(end)?;
        self.transport.init()?;
        self.transport.set_search_timeout(timeout_ms);
        let found = self.transport.search_cards_range(start, end);
        debug!(%start, %end, found, "ethernet range search");
        Ok(found)
    }

    /// Number of cards found by the last ethernet search.
    pub fn ethernet_card_count(&self) -> ScanResult<u32> {
        self.transport.init()?;
        Ok(self.transport.ethernet_card_count())
    }

    fn search_network(&self, network: NetworkAddress, timeout_ms: u32) -> ScanResult<u32> {
        self.transport.init()?;
        self.transport.set_search_timeout(timeout_ms);
        let found = self.transport.search_cards(network.ip, network.netmask);
        debug!(ip = %network.ip, netmask = %network.netmask, found, "ethernet search");
        Ok(found)
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Acquire local card `card_no`.
    pub fn acquire_card(&self, card_no: u32) -> ScanResult<ScanContext> {
        self.acquire(card_no, None)
    }

    /// Acquire the local card with `serial`.
    pub fn acquire_card_by_serial(&self, serial: u32) -> ScanResult<ScanContext> {
        for card_no in 1..=self.card_count()? {
            if self.transport.serial_number(card_no) == serial {
                return self.acquire_card(card_no);
            }
        }
        Err(ScanError::CardNotFound(serial))
    }

    /// Assign and acquire the `search_no`-th result of the last ethernet search.
    pub fn acquire_ethernet_card(&self, search_no: u32) -> ScanResult<ScanContext> {
        self.acquire_ethernet(search_no, None)
    }

    /// Acquire the ethernet card with `serial` among the last search results.
    pub fn acquire_ethernet_card_by_serial(&self, serial: u32) -> ScanResult<ScanContext> {
        self.acquire_ethernet_by_serial(serial, None)
    }

    fn acquire_ethernet_by_serial(&self, serial: u32, network: Option<NetworkAddress>) -> ScanResult<ScanContext> {
        for search_no in 1..=self.ethernet_card_count()? {
            if self.transport.ethernet_serial(search_no) == serial {
                return self.acquire_ethernet(search_no, network);
            }
        }
        Err(ScanError::CardNotFound(serial))
    }

    fn acquire_ethernet(&self, search_no: u32, network: Option<NetworkAddress>) -> ScanResult<ScanContext> {
        self.transport.init()?;
        let card_no = self.transport.assign_ethernet_card(search_no);
        if card_no == 0 {
            return Err(ScanError::InvalidParameter(format!(
                "no ethernet card at search position {search_no}"
            )));
        }
        self.acquire(card_no, network)
    }

    fn acquire(&self, card_no: u32, network: Option<NetworkAddress>) -> ScanResult<ScanContext> {
        self.transport.init()?;
        let acquired = self.transport.acquire(card_no);
        if acquired == 0 {
            self.transport.check(card_no)?;
            return Err(ScanError::CardAlreadyAcquired(card_no));
        }

        let serial = self.transport.serial_number(acquired);
        let mut record = CardRecord::new(acquired, serial, self.capabilities.max_list_size);
        record.network = network;
        let handle = self.cards.insert(record);
        info!(card = acquired, serial, ethernet = network.is_some(), "card acquired");

        ScanContext::new(self.transport.clone(), self.cards.clone(), handle, self.capabilities).map_err(|err| {
            self.transport.release(acquired);
            if self.cards.release(handle).is_err() {
                warn!(card = acquired, "card record already released");
            }
            err
        })
    }

    // =========================================================================
    // Presets
    // =========================================================================

    /// Acquire the card described by `preset` and configure it completely:
    /// communication timeouts, firmware, correction table, delays and laser.
    pub fn acquire_from_preset(
        &self,
        preset: &ConfigurationPreset,
        resources: &dyn ResourceProvider,
    ) -> ScanResult<ScanContext> {
        preset.validate()?;
        let firmware = resources.resource(&preset.firmware_resource)?;
        let fpga = resources.resource(&preset.fpga_resource)?;
        let auxiliary = resources.resource(&preset.auxiliary_resource)?;
        let correction = resources.resource(&preset.correction_resource)?;
        if correction.is_empty() {
            return Err(ScanError::InvalidParameter(format!(
                "correction resource '{}' is empty",
                preset.correction_resource
            )));
        }
        let image = FirmwareImage {
            firmware: &firmware,
            fpga: &fpga,
            auxiliary: &auxiliary,
        };

        let (mut context, firmware_loaded) = match preset.network()? {
            None => self.acquire_local_with_rescan(preset.serial_number, &image)?,
            Some(network) => {
                self.search_network(network, preset.search_timeout_ms)?;
                self.acquire_ethernet_with_rescan(preset.serial_number, network, &image)?
            }
        };

        let timeouts = &preset.timeouts;
        context.set_communication_timeouts(timeouts.initial_ms, timeouts.max_ms, timeouts.multiplier)?;
        if !firmware_loaded {
            context.load_firmware(&image)?;
        }
        context.load_correction_file(&correction, preset.correction_table, preset.correction_dimension)?;
        context.select_correction_table(preset.head_a_table, preset.head_b_table)?;
        context.configure_delays(&preset.delays)?;
        context.configure_laser_mode(&preset.laser)?;
        context.set_laser_index(preset.laser_index);
        info!(preset = %preset.name, serial = preset.serial_number, "card initialised from preset");
        Ok(context)
    }

    fn acquire_local_with_rescan(&self, serial: u32, image: &FirmwareImage<'_>) -> ScanResult<(ScanContext, bool)> {
        match self.acquire_card_by_serial(serial) {
            Ok(context) => return Ok((context, false)),
            Err(ScanError::CardNotFound(_)) => {}
            Err(err) => return Err(err),
        }
        warn!(serial, "card not found, loading firmware into uninitialised cards");
        for card_no in 1..=self.card_count()? {
            if self.transport.serial_number(card_no) != 0 {
                continue;
            }
            if let Some(context) = self.firmware_candidate(card_no, None, serial, image)? {
                return Ok((context, true));
            }
        }
        Err(ScanError::CardNotFound(serial))
    }

    fn acquire_ethernet_with_rescan(
        &self,
        serial: u32,
        network: NetworkAddress,
        image: &FirmwareImage<'_>,
    ) -> ScanResult<(ScanContext, bool)> {
        match self.acquire_ethernet_by_serial(serial, Some(network)) {
            Ok(context) => return Ok((context, false)),
            Err(ScanError::CardNotFound(_)) => {}
            Err(err) => return Err(err),
        }
        warn!(serial, "ethernet card not found, loading firmware into uninitialised cards");
        for search_no in 1..=self.ethernet_card_count()? {
            if self.transport.ethernet_serial(search_no) != 0 {
                continue;
            }
            let card_no = self.transport.assign_ethernet_card(search_no);
            if card_no == 0 {
                continue;
            }
            if let Some(context) = self.firmware_candidate(card_no, Some(network), serial, image)? {
                return Ok((context, true));
            }
        }
        Err(ScanError::CardNotFound(serial))
    }

    /// Load firmware into `card_no` and keep it if it turns out to be `serial`.
    fn firmware_candidate(
        &self,
        card_no: u32,
        network: Option<NetworkAddress>,
        serial: u32,
        image: &FirmwareImage<'_>,
    ) -> ScanResult<Option<ScanContext>> {
        let mut context = match self.acquire(card_no, network) {
            Ok(context) => context,
            Err(ScanError::CardAlreadyAcquired(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        context.load_firmware(image)?;
        if context.serial_number()? == serial {
            Ok(Some(context))
        } else {
            debug!(card = card_no, "firmware loaded into a different card, releasing it");
            Ok(None)
        }
    }
}

fn parse_ip(ip: &str) -> ScanResult<Ipv4Addr> {
    ip.parse()
        .map_err(|_| ScanError::InvalidIpAddress(ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockTransport;
    use crate::resources::MemoryResources;
    use tracing_test::traced_test;

    fn selector() -> (Arc<MockTransport>, CardSelector) {
        let mock = Arc::new(MockTransport::new());
        let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
        (mock, selector)
    }

    #[test]
    fn test_acquire_twice_fails() {
        let (mock, selector) = selector();
        mock.add_card(10);
        let _context = selector.acquire_card(1).unwrap();
        assert!(matches!(
            selector.acquire_card(1),
            Err(ScanError::CardAlreadyAcquired(1))
        ));
        assert_eq!(selector.registry().len(), 1);
    }

    #[test]
    fn test_acquire_by_serial() {
        let (mock, selector) = selector();
        mock.add_card(10);
        mock.add_card(20);
        let context = selector.acquire_card_by_serial(20).unwrap();
        assert_eq!(context.card_no().unwrap(), 2);
        assert!(matches!(
            selector.acquire_card_by_serial(30),
            Err(ScanError::CardNotFound(30))
        ));
    }

    #[test]
    fn test_ethernet_search_and_acquire() {
        let (mock, selector) = selector();
        let card_no = mock.add_ethernet_card(55, true);
        assert_eq!(selector.search_cards("192.168.1.10", "255.255.255.0", 500).unwrap(), 1);
        assert_eq!(mock.search_timeout_ms(), 500);
        let context = selector.acquire_ethernet_card_by_serial(55).unwrap();
        assert_eq!(context.card_no().unwrap(), card_no);
        assert!(mock.is_acquired(card_no));
    }

    #[test]
    fn test_search_rejects_bad_addresses() {
        let (_mock, selector) = selector();
        assert!(matches!(
            selector.search_cards("300.1.1.1", "255.255.255.0", 100),
            Err(ScanError::InvalidIpAddress(_))
        ));
        assert!(matches!(
            selector.search_cards("10.0.0.1", "255.0.255.0", 100),
            Err(ScanError::InvalidNetmask(_))
        ));
    }

    #[test]
    fn test_context_drop_frees_card() {
        let (mock, selector) = selector();
        mock.add_card(10);
        drop(selector.acquire_card(1).unwrap());
        assert!(!mock.is_acquired(1));
        assert!(selector.registry().is_empty());
        assert!(selector.acquire_card(1).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_preset_rescan_logs_firmware_load() {
        let (mock, selector) = selector();
        mock.add_uninitialized_card(77);
        let preset: ConfigurationPreset = toml::from_str(
            r#"
            name = "rescan"
            serial_number = 77
            firmware_resource = "fw"
            fpga_resource = "fpga"
            auxiliary_resource = "aux"
            correction_resource = "ct"
            "#,
        )
        .unwrap();
        let resources = MemoryResources::new()
            .with("fw", vec![1])
            .with("fpga", vec![2])
            .with("aux", vec![3])
            .with("ct", vec![4; 16]);

        let context = selector.acquire_from_preset(&preset, &resources).unwrap();
        assert_eq!(context.serial_number().unwrap(), 77);
        assert_eq!(mock.firmware_loads(1), 1);
        assert!(logs_contain("loading firmware into uninitialised cards"));
    }
}
