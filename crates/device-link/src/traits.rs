use crate::{LinkError, ParamValue, Result, Timestamp, TypeId, Uid};

/// Requests the registry hands to the communication layer.
///
/// Every request is fire-and-forget: returning `Ok` means the request was queued, not that
/// the device saw it. Confirmation arrives later through an [`UpdateSink`].
pub trait DeviceLink: Send + Sync {
    /// Extract the device type from a uid. Pure.
    fn decode_device_type(&self, uid: Uid) -> TypeId {
        uid.device_type()
    }

    /// Ask the device to report its parameters every `delay_ms` (0 stops reporting).
    fn request_subscription(&self, uid: Uid, delay_ms: u16) -> Result<()>;

    /// Ask the device to set one parameter.
    fn request_write(&self, uid: Uid, index: usize, value: &ParamValue) -> Result<()>;

    /// Ask the device to report one parameter once.
    fn request_read(&self, uid: Uid, index: usize) -> Result<()> {
        let _ = (uid, index);
        Err(LinkError::Unsupported("reads not supported"))
    }
}

/// Callbacks the communication layer drives as hardware responses arrive.
///
/// Both return whether state changed. Implementations must tolerate stale, duplicate and
/// unknown-device reports without panicking.
pub trait UpdateSink: Send + Sync {
    fn on_param_update(&self, uid: Uid, index: usize, value: ParamValue, ts: Timestamp) -> bool;

    fn on_subscription_ack(&self, uid: Uid, delay_ms: u16, ts: Timestamp) -> bool;
}
