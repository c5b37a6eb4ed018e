use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct RegistryMetrics {
    pub updates_applied: IntCounter,
    pub updates_stale: IntCounter,
    pub updates_dropped: IntCounter,
    pub acks_applied: IntCounter,
    pub requests_forwarded: IntCounter,
    pub devices: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: RegistryMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let dev = RegistryMetrics {
            updates_applied: counter(
                "devreg_updates_applied",
                "Parameter updates that replaced stored state",
            )?,
            updates_stale: counter(
                "devreg_updates_stale",
                "Parameter updates ignored as not newer than stored state",
            )?,
            updates_dropped: counter(
                "devreg_updates_dropped",
                "Callbacks dropped for unknown devices or parameters",
            )?,
            acks_applied: counter("devreg_acks_applied", "Subscription acks applied")?,
            requests_forwarded: counter(
                "devreg_requests_forwarded",
                "Requests handed to the device link",
            )?,
            devices: IntGauge::new("devreg_devices", "Number of registered devices")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(dev.updates_applied.clone()));
        let _ = registry.register(Box::new(dev.updates_stale.clone()));
        let _ = registry.register(Box::new(dev.updates_dropped.clone()));
        let _ = registry.register(Box::new(dev.acks_applied.clone()));
        let _ = registry.register(Box::new(dev.requests_forwarded.clone()));
        let _ = registry.register(Box::new(dev.devices.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
