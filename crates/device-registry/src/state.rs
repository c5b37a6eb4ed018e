use crate::{Error, ParamRef, Result, Schema};
use device_link::{ParamValue, Timestamp, Uid};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Where a device sits in its polling lifecycle.
///
/// A requested-but-unacknowledged subscription is not tracked; the device keeps
/// reporting its previous state until an ack arrives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Subscription {
    Unsubscribed,
    Subscribed { delay_ms: u16, acked_at: Timestamp },
}

/// Timestamped parameter values and subscription state of one device.
///
/// `params` always has exactly one slot per schema parameter.
#[derive(Debug, Clone)]
pub struct DeviceState {
    uid: Uid,
    schema: Arc<Schema>,
    params: Vec<(ParamValue, Timestamp)>,
    delay_ms: u16,
    sub_timestamp: Timestamp,
}

impl DeviceState {
    pub fn new(uid: Uid, schema: Arc<Schema>) -> Self {
        let params = vec![(ParamValue::default(), Timestamp::NEVER); schema.len()];
        Self {
            uid,
            schema,
            params,
            delay_ms: 0,
            sub_timestamp: Timestamp::NEVER,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn resolve(&self, param: &ParamRef) -> Result<usize> {
        self.schema
            .resolve(param)
            .ok_or_else(|| Error::UnknownParameter {
                uid: self.uid,
                param: param.clone(),
            })
    }

    pub fn get(&self, param: &ParamRef) -> Result<(ParamValue, Timestamp)> {
        let index = self.resolve(param)?;
        Ok(self.params[index].clone())
    }

    pub fn timestamp(&self, param: &ParamRef) -> Result<Timestamp> {
        let index = self.resolve(param)?;
        Ok(self.params[index].1)
    }

    /// Newest-wins: replace slot `index` only when `ts` is strictly newer than what is
    /// stored. Returns whether the slot changed.
    pub fn apply_update(&mut self, index: usize, value: ParamValue, ts: Timestamp) -> Result<bool> {
        let uid = self.uid;
        let slot = self
            .params
            .get_mut(index)
            .ok_or(Error::UnknownParameter {
                uid,
                param: ParamRef::Index(index),
            })?;
        if !ts.is_newer_than(slot.1) {
            return Ok(false);
        }
        *slot = (value, ts);
        Ok(true)
    }

    /// Record a subscription ack. Gated like parameter updates, so a late ack cannot
    /// roll back a newer one.
    pub fn update_subscription(&mut self, delay_ms: u16, ts: Timestamp) -> bool {
        if !ts.is_newer_than(self.sub_timestamp) {
            return false;
        }
        self.delay_ms = delay_ms;
        self.sub_timestamp = ts;
        true
    }

    pub fn delay(&self) -> u16 {
        self.delay_ms
    }

    pub fn subscription_timestamp(&self) -> Timestamp {
        self.sub_timestamp
    }

    pub fn subscription(&self) -> Subscription {
        if self.delay_ms == 0 {
            Subscription::Unsubscribed
        } else {
            Subscription::Subscribed {
                delay_ms: self.delay_ms,
                acked_at: self.sub_timestamp,
            }
        }
    }

    pub fn params(&self) -> &[(ParamValue, Timestamp)] {
        &self.params
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {}: {}", self.uid, self.schema.name())?;
        write!(
            f,
            "    subscription: {}ms @ {}",
            self.delay_ms, self.sub_timestamp
        )?;
        for (name, (value, ts)) in self.schema.param_names().iter().zip(&self.params) {
            write!(f, "\n    {name}: {value} @ {ts}")?;
        }
        Ok(())
    }
}
