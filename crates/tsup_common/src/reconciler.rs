//! Network and firewall reconciliation
//!
//! Brings the persisted configuration to the state the agent needs without
//! touching anything that already exists. Every ensure step checks before it
//! creates, so a partial earlier run can be finished by simply running again.

use crate::config_store::{ConfigStore, OptionValue};
use crate::error::StoreError;
use tracing::{debug, info};

/// Logical interface and firewall zone name.
pub const TAILSCALE_NETWORK: &str = "tailscale";

/// Kernel device the agent creates.
pub const TAILSCALE_DEVICE: &str = "tailscale0";

/// Zone the tailnet is forwarded to and from.
pub const LAN_ZONE: &str = "lan";

const NETWORK_PACKAGE: &str = "network";
const FIREWALL_PACKAGE: &str = "firewall";

/// What a reconcile pass created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub interface_created: bool,
    pub zone_created: bool,
    /// `(src, dest)` pairs that were added
    pub forwardings_created: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.interface_created || self.zone_created || !self.forwardings_created.is_empty()
    }
}

pub struct ConfigReconciler<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> ConfigReconciler<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    pub fn has_network_interface(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .section(NETWORK_PACKAGE, TAILSCALE_NETWORK)?
            .is_some())
    }

    /// Zones are matched on their `name` option, not the section id.
    pub fn has_firewall_zone(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .sections_of_kind(FIREWALL_PACKAGE, "zone")?
            .iter()
            .any(|zone| zone.option("name") == Some(TAILSCALE_NETWORK)))
    }

    pub fn has_forwarding(&self, src: &str, dest: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .sections_of_kind(FIREWALL_PACKAGE, "forwarding")?
            .iter()
            .any(|fwd| fwd.option("src") == Some(src) && fwd.option("dest") == Some(dest)))
    }

    /// Interface and zone both present.
    pub fn is_complete(&self) -> Result<bool, StoreError> {
        Ok(self.has_network_interface()? && self.has_firewall_zone()?)
    }

    /// Create the `tailscale` interface and commit `network`. An existing
    /// interface is left exactly as it is.
    pub fn ensure_network_interface(&self) -> Result<bool, StoreError> {
        if self.has_network_interface()? {
            debug!("Interface {} already present", TAILSCALE_NETWORK);
            return Ok(false);
        }

        info!("Creating network interface {}", TAILSCALE_NETWORK);
        let id = self
            .store
            .add_section(NETWORK_PACKAGE, "interface", Some(TAILSCALE_NETWORK))?;
        self.store
            .set(NETWORK_PACKAGE, &id, "proto", &OptionValue::single("unmanaged"))?;
        self.store
            .set(NETWORK_PACKAGE, &id, "device", &OptionValue::single(TAILSCALE_DEVICE))?;
        self.store.commit(NETWORK_PACKAGE)?;
        Ok(true)
    }

    /// Create the `tailscale` zone (uncommitted).
    pub fn ensure_firewall_zone(&self) -> Result<bool, StoreError> {
        if self.has_firewall_zone()? {
            debug!("Firewall zone {} already present", TAILSCALE_NETWORK);
            return Ok(false);
        }

        info!("Creating firewall zone {}", TAILSCALE_NETWORK);
        let id = self.store.add_section(FIREWALL_PACKAGE, "zone", None)?;
        let fields = [
            ("name", OptionValue::single(TAILSCALE_NETWORK)),
            ("input", OptionValue::single("ACCEPT")),
            ("output", OptionValue::single("ACCEPT")),
            ("forward", OptionValue::single("ACCEPT")),
            ("masq", OptionValue::single("1")),
            ("mtu_fix", OptionValue::single("1")),
            ("network", OptionValue::list([TAILSCALE_NETWORK])),
        ];
        for (option, value) in &fields {
            self.store.set(FIREWALL_PACKAGE, &id, option, value)?;
        }
        Ok(true)
    }

    /// Create a `src -> dest` forwarding (uncommitted) unless one exists
    /// under any name.
    pub fn ensure_forwarding(&self, src: &str, dest: &str) -> Result<bool, StoreError> {
        if self.has_forwarding(src, dest)? {
            debug!("Forwarding {} -> {} already present", src, dest);
            return Ok(false);
        }

        info!("Creating firewall forwarding {} -> {}", src, dest);
        let id = self.store.add_section(FIREWALL_PACKAGE, "forwarding", None)?;
        self.store.set(
            FIREWALL_PACKAGE,
            &id,
            "name",
            &OptionValue::single(format!("{}-{}", src, dest)),
        )?;
        self.store
            .set(FIREWALL_PACKAGE, &id, "src", &OptionValue::single(src))?;
        self.store
            .set(FIREWALL_PACKAGE, &id, "dest", &OptionValue::single(dest))?;
        Ok(true)
    }

    /// Interface, zone, both forwardings, then one firewall commit.
    pub fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport {
            interface_created: self.ensure_network_interface()?,
            zone_created: self.ensure_firewall_zone()?,
            forwardings_created: Vec::new(),
        };

        for (src, dest) in [(TAILSCALE_NETWORK, LAN_ZONE), (LAN_ZONE, TAILSCALE_NETWORK)] {
            if self.ensure_forwarding(src, dest)? {
                report
                    .forwardings_created
                    .push((src.to_string(), dest.to_string()));
            }
        }

        self.store.commit(FIREWALL_PACKAGE)?;
        Ok(report)
    }
}
