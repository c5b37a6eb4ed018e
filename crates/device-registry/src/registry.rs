use crate::{DeviceState, Error, MetricsHub, ParamRef, Result, Schema, SchemaRegistry};
use device_link::{DeviceLink, ParamValue, Timestamp, TypeId, Uid, UpdateSink};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Outcome of [`DeviceRegistry::register_if_absent`] and [`DeviceRegistry::replace_device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    AlreadyRegistered,
    Replaced,
}

/// Live devices and their timestamped parameters.
///
/// # Concurrency
///
/// Application calls and link callbacks may run on different threads at once. The device
/// map sits behind one lock that is held only long enough to look up, insert or remove an
/// entry; each device's state has its own lock. Reads copy out a whole `(value, timestamp)`
/// pair under the device lock, and the newest-wins compare-and-set runs under the same
/// lock, so for any parameter the surviving value is the one with the greatest timestamp
/// ever delivered, whatever the arrival order. No lock is held while calling the link.
pub struct DeviceRegistry {
    schemas: Arc<SchemaRegistry>,
    devices: RwLock<HashMap<Uid, Arc<RwLock<DeviceState>>>>,
    link: Arc<dyn DeviceLink>,
    metrics: Option<MetricsHub>,
}

impl DeviceRegistry {
    pub fn new(schemas: Arc<SchemaRegistry>, link: Arc<dyn DeviceLink>) -> Self {
        Self {
            schemas,
            devices: RwLock::new(HashMap::new()),
            link,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    fn device(&self, uid: Uid) -> Result<Arc<RwLock<DeviceState>>> {
        self.devices
            .read()
            .get(&uid)
            .cloned()
            .ok_or(Error::UnknownDevice(uid))
    }

    fn schema_for(&self, uid: Uid) -> Result<Arc<Schema>> {
        let type_id = self.link.decode_device_type(uid);
        self.schemas
            .get(type_id)
            .cloned()
            .ok_or(Error::UnknownDeviceType { uid, type_id })
    }

    fn set_device_gauge(&self, len: usize) {
        if let Some(m) = &self.metrics {
            m.dev.devices.set(len as i64);
        }
    }

    fn count_request(&self) {
        if let Some(m) = &self.metrics {
            m.dev.requests_forwarded.inc();
        }
    }

    // Queries

    pub fn contains(&self, uid: Uid) -> bool {
        self.devices.read().contains_key(&uid)
    }

    /// Registered uids in ascending order
    pub fn device_uids(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.devices.read().keys().copied().collect();
        uids.sort();
        uids
    }

    pub fn get_data(&self, uid: Uid, param: &ParamRef) -> Result<(ParamValue, Timestamp)> {
        self.device(uid)?.read().get(param)
    }

    pub fn get_delay(&self, uid: Uid) -> Result<u16> {
        Ok(self.device(uid)?.read().delay())
    }

    /// Parameter names per uid, in input order. Fails on the first unknown uid.
    pub fn get_params(&self, uids: &[Uid]) -> Result<Vec<Vec<String>>> {
        uids.iter()
            .map(|uid| {
                let dev = self.device(*uid)?;
                let names = dev.read().schema().param_names().to_vec();
                Ok(names)
            })
            .collect()
    }

    pub fn get_device_name(&self, type_id: TypeId) -> Option<&str> {
        self.schemas.get(type_id).map(|s| s.name())
    }

    /// A consistent copy of one device's state
    pub fn snapshot(&self, uid: Uid) -> Result<DeviceState> {
        Ok(self.device(uid)?.read().clone())
    }

    // Commands forwarded to the link

    /// Ask the link to start polling `uid` every `delay_ms`. Returns once the request is
    /// queued; the new delay shows up only after the ack arrives.
    pub fn subscribe(&self, uid: Uid, delay_ms: i64) -> Result<()> {
        let delay = u16::try_from(delay_ms).map_err(|_| Error::InvalidDelay(delay_ms))?;
        if !self.contains(uid) {
            return Err(Error::UnknownDevice(uid));
        }
        self.link.request_subscription(uid, delay)?;
        self.count_request();
        debug!(%uid, delay_ms = delay, "subscription requested");
        Ok(())
    }

    /// Subscribe each `(uid, delay)` in order, stopping at the first failure.
    pub fn subscribe_many(&self, requests: &[(Uid, i64)]) -> Result<()> {
        for (uid, delay_ms) in requests {
            self.subscribe(*uid, *delay_ms)?;
        }
        Ok(())
    }

    /// Ask the link to stop polling `uid`.
    pub fn unsubscribe(&self, uid: Uid) -> Result<()> {
        self.subscribe(uid, 0)
    }

    /// Forward a write. Local state changes only when the device reports the new value.
    pub fn write_value(&self, uid: Uid, param: &ParamRef, value: ParamValue) -> Result<()> {
        let index = self.device(uid)?.read().resolve(param)?;
        self.link.request_write(uid, index, &value)?;
        self.count_request();
        debug!(%uid, index, %value, "write requested");
        Ok(())
    }

    /// Ask the device to report one parameter once.
    pub fn read_value(&self, uid: Uid, param: &ParamRef) -> Result<()> {
        let index = self.device(uid)?.read().resolve(param)?;
        self.link.request_read(uid, index)?;
        self.count_request();
        debug!(%uid, index, "read requested");
        Ok(())
    }

    // Registration

    /// Install fresh state for `uid`, discarding any history it had.
    pub fn replace_device(&self, uid: Uid) -> Result<Registration> {
        let schema = self.schema_for(uid)?;
        let state = Arc::new(RwLock::new(DeviceState::new(uid, schema)));
        let previous = {
            let mut devices = self.devices.write();
            let previous = devices.insert(uid, state);
            // under the map lock so concurrent registrations publish in order
            self.set_device_gauge(devices.len());
            previous
        };
        if previous.is_some() {
            info!(%uid, "device re-registered, history discarded");
            Ok(Registration::Replaced)
        } else {
            info!(%uid, "device registered");
            Ok(Registration::Inserted)
        }
    }

    /// Register `uid` unless it is already known, keeping existing history.
    pub fn register_if_absent(&self, uid: Uid) -> Result<Registration> {
        let schema = self.schema_for(uid)?;
        {
            let mut devices = self.devices.write();
            if devices.contains_key(&uid) {
                return Ok(Registration::AlreadyRegistered);
            }
            devices.insert(uid, Arc::new(RwLock::new(DeviceState::new(uid, schema))));
            self.set_device_gauge(devices.len());
        }
        info!(%uid, "device registered");
        Ok(Registration::Inserted)
    }

    /// Discovery-time registration: always installs fresh state, like
    /// [`DeviceRegistry::replace_device`].
    pub fn register_device(&self, uid: Uid) -> Result<Registration> {
        self.replace_device(uid)
    }

    /// Drop a device. Later callbacks for it are reported as unknown.
    pub fn forget_device(&self, uid: Uid) -> bool {
        let removed = {
            let mut devices = self.devices.write();
            let removed = devices.remove(&uid).is_some();
            if removed {
                self.set_device_gauge(devices.len());
            }
            removed
        };
        if removed {
            info!(%uid, "device forgotten");
        }
        removed
    }

    // Link callbacks

    /// Apply a reported parameter value if it is newer than what is stored.
    pub fn on_param_update(
        &self,
        uid: Uid,
        index: usize,
        value: ParamValue,
        ts: Timestamp,
    ) -> Result<bool> {
        let applied = self.device(uid)?.write().apply_update(index, value, ts)?;
        if applied {
            debug!(%uid, index, %ts, "parameter updated");
        } else {
            trace!(%uid, index, %ts, "stale parameter update ignored");
        }
        if let Some(m) = &self.metrics {
            if applied {
                m.dev.updates_applied.inc();
            } else {
                m.dev.updates_stale.inc();
            }
        }
        Ok(applied)
    }

    /// Apply a subscription ack if it is newer than the last one.
    pub fn on_subscription_ack(&self, uid: Uid, delay_ms: u16, ts: Timestamp) -> Result<bool> {
        let applied = self.device(uid)?.write().update_subscription(delay_ms, ts);
        if applied {
            debug!(%uid, delay_ms, %ts, "subscription acknowledged");
            if let Some(m) = &self.metrics {
                m.dev.acks_applied.inc();
            }
        } else {
            trace!(%uid, delay_ms, %ts, "stale subscription ack ignored");
        }
        Ok(applied)
    }

    fn dropped(&self, err: &Error) {
        warn!(error = %err, "dropping link callback");
        if let Some(m) = &self.metrics {
            m.dev.updates_dropped.inc();
        }
    }
}

impl UpdateSink for DeviceRegistry {
    fn on_param_update(&self, uid: Uid, index: usize, value: ParamValue, ts: Timestamp) -> bool {
        match DeviceRegistry::on_param_update(self, uid, index, value, ts) {
            Ok(applied) => applied,
            Err(e) => {
                self.dropped(&e);
                false
            }
        }
    }

    fn on_subscription_ack(&self, uid: Uid, delay_ms: u16, ts: Timestamp) -> bool {
        match DeviceRegistry::on_subscription_ack(self, uid, delay_ms, ts) {
            Ok(applied) => applied,
            Err(e) => {
                self.dropped(&e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_link::{LinkError, LinkRequest, MockLink};

    const LIMIT_SWITCH: TypeId = TypeId(1);
    const SERVO: TypeId = TypeId(2);

    fn schemas() -> Arc<SchemaRegistry> {
        let src = "id,name,p1,p2\n1,LimitSwitch,state\n2,Servo,angle,speed\n";
        Arc::new(SchemaRegistry::from_reader(src.as_bytes()).unwrap())
    }

    fn setup() -> (DeviceRegistry, Arc<MockLink>) {
        let link = Arc::new(MockLink::new());
        let reg = DeviceRegistry::new(schemas(), link.clone());
        (reg, link)
    }

    fn switch_uid() -> Uid {
        Uid::from_parts(LIMIT_SWITCH, 0x10, 42)
    }

    fn ts(secs: f64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn test_limit_switch_scenario() {
        let (reg, _link) = setup();
        let uid = switch_uid();
        assert_eq!(reg.register_device(uid).unwrap(), Registration::Inserted);

        let state: ParamRef = "state".into();
        assert_eq!(
            reg.get_data(uid, &state).unwrap(),
            (ParamValue::Int(0), Timestamp::NEVER)
        );
        assert!(reg.on_param_update(uid, 0, ParamValue::Int(1), ts(5.0)).unwrap());
        assert_eq!(reg.get_data(uid, &state).unwrap(), (ParamValue::Int(1), ts(5.0)));
        assert!(!reg.on_param_update(uid, 0, ParamValue::Int(0), ts(3.0)).unwrap());
        assert_eq!(reg.get_data(uid, &state).unwrap(), (ParamValue::Int(1), ts(5.0)));
        assert!(reg.on_param_update(uid, 0, ParamValue::Int(0), ts(7.0)).unwrap());
        assert_eq!(reg.get_data(uid, &state).unwrap(), (ParamValue::Int(0), ts(7.0)));
    }

    #[test]
    fn test_invalid_delay_never_reaches_link() {
        let (reg, link) = setup();
        let uid = switch_uid();
        reg.register_device(uid).unwrap();
        let before = reg.get_delay(uid).unwrap();

        assert!(matches!(reg.subscribe(uid, 70_000), Err(Error::InvalidDelay(70_000))));
        assert!(matches!(reg.subscribe(uid, -1), Err(Error::InvalidDelay(-1))));
        assert!(link.sent().is_empty());
        assert_eq!(reg.get_delay(uid).unwrap(), before);

        reg.subscribe(uid, 65_535).unwrap();
        reg.subscribe(uid, 0).unwrap();
        assert_eq!(link.sent().len(), 2);
    }

    #[test]
    fn test_subscribe_is_fire_and_forget() {
        let (reg, link) = setup();
        let uid = switch_uid();
        reg.register_device(uid).unwrap();

        reg.subscribe(uid, 100).unwrap();
        reg.subscribe(uid, 100).unwrap();
        assert_eq!(reg.get_delay(uid).unwrap(), 0);
        assert_eq!(
            link.sent(),
            vec![
                LinkRequest::Subscribe { uid, delay_ms: 100 },
                LinkRequest::Subscribe { uid, delay_ms: 100 },
            ]
        );

        assert_eq!(link.acknowledge(&reg, ts(1.0)), 1);
        assert_eq!(reg.get_delay(uid).unwrap(), 100);
    }

    #[test]
    fn test_stale_ack_does_not_roll_back() {
        let (reg, _link) = setup();
        let uid = switch_uid();
        reg.register_device(uid).unwrap();

        assert!(reg.on_subscription_ack(uid, 20, ts(9.0)).unwrap());
        assert!(!reg.on_subscription_ack(uid, 500, ts(4.0)).unwrap());
        assert_eq!(reg.get_delay(uid).unwrap(), 20);
        reg.unsubscribe(uid).unwrap();
        assert!(reg.on_subscription_ack(uid, 0, ts(10.0)).unwrap());
        assert_eq!(reg.get_delay(uid).unwrap(), 0);
    }

    #[test]
    fn test_unknown_device_errors() {
        let (reg, link) = setup();
        let uid = switch_uid();
        assert!(matches!(reg.get_delay(uid), Err(Error::UnknownDevice(u)) if u == uid));
        assert!(matches!(
            reg.get_data(uid, &"state".into()),
            Err(Error::UnknownDevice(_))
        ));
        assert!(matches!(reg.subscribe(uid, 10), Err(Error::UnknownDevice(_))));
        assert!(matches!(
            reg.write_value(uid, &"state".into(), ParamValue::Int(1)),
            Err(Error::UnknownDevice(_))
        ));
        assert!(matches!(
            reg.on_param_update(uid, 0, ParamValue::Int(1), ts(1.0)),
            Err(Error::UnknownDevice(_))
        ));
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_unknown_device_type() {
        let (reg, _link) = setup();
        let uid = Uid::from_parts(TypeId(0x7F), 0, 1);
        assert!(matches!(
            reg.register_device(uid),
            Err(Error::UnknownDeviceType { type_id: TypeId(0x7F), .. })
        ));
        assert!(!reg.contains(uid));
    }

    #[test]
    fn test_get_params_preserves_order() {
        let (reg, _link) = setup();
        let servo = Uid::from_parts(SERVO, 0, 1);
        let switch = switch_uid();
        reg.register_device(servo).unwrap();
        reg.register_device(switch).unwrap();

        let params = reg.get_params(&[switch, servo, switch]).unwrap();
        assert_eq!(
            params,
            vec![
                vec!["state".to_string()],
                vec!["angle".to_string(), "speed".to_string()],
                vec!["state".to_string()],
            ]
        );
        let missing = Uid::from_parts(SERVO, 0, 2);
        assert!(matches!(
            reg.get_params(&[servo, missing]),
            Err(Error::UnknownDevice(u)) if u == missing
        ));
        assert_eq!(reg.device_uids(), vec![switch, servo]);
        assert_eq!(reg.get_device_name(SERVO), Some("Servo"));
    }

    #[test]
    fn test_write_value_resolves_name_once() {
        let (reg, link) = setup();
        let servo = Uid::from_parts(SERVO, 0, 1);
        reg.register_device(servo).unwrap();

        reg.write_value(servo, &"speed".into(), ParamValue::Float(0.5))
            .unwrap();
        reg.read_value(servo, &ParamRef::Index(0)).unwrap();
        assert!(matches!(
            reg.write_value(servo, &"torque".into(), ParamValue::Int(1)),
            Err(Error::UnknownParameter { .. })
        ));
        assert_eq!(
            link.sent(),
            vec![
                LinkRequest::Write {
                    uid: servo,
                    index: 1,
                    value: ParamValue::Float(0.5)
                },
                LinkRequest::Read { uid: servo, index: 0 },
            ]
        );
        // nothing changes until the device echoes the write
        assert_eq!(
            reg.get_data(servo, &"speed".into()).unwrap().1,
            Timestamp::NEVER
        );
        link.acknowledge(&reg, ts(3.0));
        assert_eq!(
            reg.get_data(servo, &"speed".into()).unwrap(),
            (ParamValue::Float(0.5), ts(3.0))
        );
    }

    #[test]
    fn test_closed_link_is_collaborator_unavailable() {
        let (reg, link) = setup();
        let uid = switch_uid();
        reg.register_device(uid).unwrap();
        link.close();
        assert!(matches!(
            reg.subscribe(uid, 10),
            Err(Error::CollaboratorUnavailable(LinkError::Closed))
        ));
    }

    #[test]
    fn test_registration_modes() {
        let (reg, _link) = setup();
        let uid = switch_uid();
        assert_eq!(reg.register_if_absent(uid).unwrap(), Registration::Inserted);
        reg.on_param_update(uid, 0, ParamValue::Int(1), ts(2.0)).unwrap();

        assert_eq!(
            reg.register_if_absent(uid).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(reg.get_data(uid, &ParamRef::Index(0)).unwrap().1, ts(2.0));

        assert_eq!(reg.replace_device(uid).unwrap(), Registration::Replaced);
        assert_eq!(
            reg.get_data(uid, &ParamRef::Index(0)).unwrap().1,
            Timestamp::NEVER
        );

        assert!(reg.forget_device(uid));
        assert!(!reg.forget_device(uid));
        assert!(!reg.contains(uid));
    }

    #[test]
    fn test_sink_drops_desynchronised_callbacks() {
        let metrics = MetricsHub::new().unwrap();
        let link = Arc::new(MockLink::new());
        let reg = DeviceRegistry::new(schemas(), link).with_metrics(metrics);
        let uid = switch_uid();
        let sink: &dyn UpdateSink = &reg;

        assert!(!sink.on_param_update(uid, 0, ParamValue::Int(1), ts(1.0)));
        assert!(!sink.on_subscription_ack(uid, 10, ts(1.0)));
        reg.register_device(uid).unwrap();
        assert!(!sink.on_param_update(uid, 5, ParamValue::Int(1), ts(1.0)));
        assert!(sink.on_param_update(uid, 0, ParamValue::Int(1), ts(1.0)));
        assert!(!sink.on_param_update(uid, 0, ParamValue::Int(1), ts(1.0)));

        let m = reg.metrics().unwrap();
        assert_eq!(m.dev.updates_dropped.get(), 3);
        assert_eq!(m.dev.updates_applied.get(), 1);
        assert_eq!(m.dev.updates_stale.get(), 1);
        assert_eq!(m.dev.devices.get(), 1);
        assert!(m.encode_text().contains("devreg_updates_dropped 3"));
    }

    #[test]
    fn test_device_gauge_tracks_concurrent_registration() {
        let link = Arc::new(MockLink::new());
        let reg = DeviceRegistry::new(schemas(), link).with_metrics(MetricsHub::new().unwrap());

        std::thread::scope(|s| {
            for worker in 0..8u64 {
                let reg = &reg;
                s.spawn(move || {
                    for i in 0..200u64 {
                        let uid = Uid::from_parts(SERVO, 0, worker * 1000 + i);
                        reg.register_if_absent(uid).unwrap();
                        reg.replace_device(uid).unwrap();
                        // keep every other device
                        if i % 2 == 1 {
                            assert!(reg.forget_device(uid));
                        }
                    }
                });
            }
        });

        let gauge = reg.metrics().unwrap().dev.devices.get();
        assert_eq!(reg.device_uids().len(), 8 * 100);
        assert_eq!(gauge, 8 * 100);
    }

    #[test]
    fn test_concurrent_updates_keep_newest() {
        let (reg, _link) = setup();
        let servo = Uid::from_parts(SERVO, 0, 1);
        reg.register_device(servo).unwrap();

        // interleave ascending and descending writers on both slots
        std::thread::scope(|s| {
            for worker in 0..4u32 {
                let reg = &reg;
                s.spawn(move || {
                    for i in 0..500u32 {
                        let step = if worker % 2 == 0 { i } else { 499 - i };
                        let t = f64::from(step * 4 + worker);
                        let index = (worker as usize) % 2;
                        reg.on_param_update(servo, index, ParamValue::Float(t), ts(t))
                            .unwrap();
                        let (value, stamp) = reg.get_data(servo, &ParamRef::Index(index)).unwrap();
                        assert_eq!(value, ParamValue::Float(stamp.as_secs()));
                    }
                });
            }
        });

        // slot 0 saw workers 0 and 2, slot 1 workers 1 and 3
        let (v0, t0) = reg.get_data(servo, &ParamRef::Index(0)).unwrap();
        assert_eq!(t0, ts(f64::from(499 * 4 + 2)));
        assert_eq!(v0, ParamValue::Float(f64::from(499 * 4 + 2)));
        let (_, t1) = reg.get_data(servo, &ParamRef::Index(1)).unwrap();
        assert_eq!(t1, ts(f64::from(499 * 4 + 3)));
        assert_eq!(reg.snapshot(servo).unwrap().params().len(), 2);
    }
}
