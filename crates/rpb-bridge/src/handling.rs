//! Object data handling strategies
//!
//! A strategy decides where a message received on one protocol of a node
//! goes next. Protocols are split into role A and role B; the strategy only
//! knows their ids and asks the node to do the actual sending.
//!
//! Multiplexing numbers channels across all protocols of a role. With `n`
//! channels per source protocol and `m` per destination protocol, local
//! channel `c` (1-based) of source protocol `i` (0-based) maps to
//!
//! ```text
//! absolute = i * n + c
//! target   = (absolute - 1) / m
//! channel  = 1 + (absolute - 1) % m
//! ```

use rpb_core::{
    ObjectHandlingData, ObjectHandlingMode, ProtocolId, RemoteObjectAddressing,
    RemoteObjectIdentifier, RemoteObjectMessageData, RemoteObjectValueType,
};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::Result;

type Roi = RemoteObjectIdentifier;

/// Sending side of a node as seen by a strategy
pub trait MessageSender {
    fn send_to(&self, protocol_id: ProtocolId, roi: Roi, data: &RemoteObjectMessageData) -> Result<()>;
}

/// Protocol role within a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    A,
    B,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

/// Object, channel (or absolute channel when multiplexing) and record
type ValueKey = (Roi, i32, i16);

type ValueCache = HashMap<ValueKey, RemoteObjectMessageData>;

#[derive(Debug)]
enum Strategy {
    Bypass,
    ForwardOnly,
    ReverseOnly,
    Remap {
        positions: HashMap<i32, Position>,
    },
    Mux {
        a_channels: u16,
        b_channels: u16,
    },
    ValueFilter {
        precision: f32,
        last_values: ValueCache,
    },
    MuxValueFilter {
        a_channels: u16,
        b_channels: u16,
        precision: f32,
        last_values: ValueCache,
    },
}

/// Data handling strategy of one node
#[derive(Debug)]
pub struct ObjectDataHandling {
    mode: ObjectHandlingMode,
    protocol_a_ids: Vec<ProtocolId>,
    protocol_b_ids: Vec<ProtocolId>,
    strategy: Strategy,
}

impl ObjectDataHandling {
    /// Build the strategy selected by `data.mode`; `None` for the invalid mode
    pub fn new(data: &ObjectHandlingData) -> Option<Self> {
        let strategy = match data.mode {
            ObjectHandlingMode::Invalid => return None,
            ObjectHandlingMode::Bypass => Strategy::Bypass,
            ObjectHandlingMode::ForwardAToBOnly => Strategy::ForwardOnly,
            ObjectHandlingMode::ReverseBToAOnly => Strategy::ReverseOnly,
            ObjectHandlingMode::RemapAXYToBXY => Strategy::Remap {
                positions: HashMap::new(),
            },
            ObjectHandlingMode::MuxNAToMB => Strategy::Mux {
                a_channels: data.a_channel_count,
                b_channels: data.b_channel_count,
            },
            ObjectHandlingMode::ForwardOnlyValueChanges => Strategy::ValueFilter {
                precision: data.precision,
                last_values: HashMap::new(),
            },
            ObjectHandlingMode::MuxNAToMBWithValFilter => Strategy::MuxValueFilter {
                a_channels: data.a_channel_count,
                b_channels: data.b_channel_count,
                precision: data.precision,
                last_values: HashMap::new(),
            },
        };

        Some(Self {
            mode: data.mode,
            protocol_a_ids: Vec::new(),
            protocol_b_ids: Vec::new(),
            strategy,
        })
    }

    pub fn mode(&self) -> ObjectHandlingMode {
        self.mode
    }

    pub fn add_protocol_a_id(&mut self, id: ProtocolId) {
        self.protocol_a_ids.push(id);
    }

    pub fn add_protocol_b_id(&mut self, id: ProtocolId) {
        self.protocol_b_ids.push(id);
    }

    pub fn clear_protocol_ids(&mut self) {
        self.protocol_a_ids.clear();
        self.protocol_b_ids.clear();
    }

    pub fn protocol_a_ids(&self) -> &[ProtocolId] {
        &self.protocol_a_ids
    }

    pub fn protocol_b_ids(&self) -> &[ProtocolId] {
        &self.protocol_b_ids
    }

    /// Forget cached positions and last values; protocol ids are kept
    pub fn reset(&mut self) {
        match &mut self.strategy {
            Strategy::Remap { positions } => positions.clear(),
            Strategy::ValueFilter { last_values, .. }
            | Strategy::MuxValueFilter { last_values, .. } => last_values.clear(),
            Strategy::Bypass | Strategy::ForwardOnly | Strategy::ReverseOnly | Strategy::Mux { .. } => {}
        }
    }

    /// Role and position within the role of a protocol id
    pub fn role_of(&self, id: ProtocolId) -> Option<(Role, usize)> {
        if let Some(index) = self.protocol_a_ids.iter().position(|p| *p == id) {
            return Some((Role::A, index));
        }
        self.protocol_b_ids
            .iter()
            .position(|p| *p == id)
            .map(|index| (Role::B, index))
    }

    /// Handle a message received on `source`
    ///
    /// Returns true when the message was accepted and every send it caused
    /// succeeded. Strategy state may change even when false is returned.
    pub fn on_received_message(
        &mut self,
        sender: &dyn MessageSender,
        source: ProtocolId,
        roi: Roi,
        data: &RemoteObjectMessageData,
    ) -> bool {
        let Some((role, index)) = self.role_of(source) else {
            debug!("Message from protocol {} outside of this node", source);
            return false;
        };

        let others: &[ProtocolId] = match role {
            Role::A => &self.protocol_b_ids,
            Role::B => &self.protocol_a_ids,
        };

        match &mut self.strategy {
            Strategy::Bypass => send_all(sender, others, roi, data),

            Strategy::ForwardOnly => match role {
                Role::A => send_all(sender, others, roi, data),
                Role::B => true,
            },

            Strategy::ReverseOnly => match role {
                Role::A => true,
                Role::B => send_all(sender, others, roi, data),
            },

            Strategy::Remap { positions } => remap(positions, sender, others, role, roi, data),

            Strategy::Mux {
                a_channels,
                b_channels,
            } => {
                let (src, dst) = channel_counts(role, *a_channels, *b_channels);
                if !data.addressing.has_primary() {
                    return send_all(sender, others, roi, data);
                }
                match mux_route(index, src, dst, others, data.addressing) {
                    Some(route) => send_one(sender, route.target, roi, &data.with_addressing(route.addressing)),
                    None => {
                        debug!("No multiplex target for channel {} of protocol {}", data.addressing.primary, source);
                        false
                    }
                }
            }

            Strategy::ValueFilter {
                precision,
                last_values,
            } => {
                let key = (roi, data.addressing.primary as i32, data.addressing.secondary);
                if !remember_if_changed(last_values, key, *precision, data) {
                    return true;
                }
                send_all(sender, others, roi, data)
            }

            Strategy::MuxValueFilter {
                a_channels,
                b_channels,
                precision,
                last_values,
            } => {
                let (src, dst) = channel_counts(role, *a_channels, *b_channels);
                if !data.addressing.has_primary() {
                    let key = (roi, data.addressing.primary as i32, data.addressing.secondary);
                    if !remember_if_changed(last_values, key, *precision, data) {
                        return true;
                    }
                    return send_all(sender, others, roi, data);
                }
                let Some(route) = mux_route(index, src, dst, others, data.addressing) else {
                    debug!("No multiplex target for channel {} of protocol {}", data.addressing.primary, source);
                    return false;
                };
                let key = (roi, route.absolute, data.addressing.secondary);
                if !remember_if_changed(last_values, key, *precision, data) {
                    return true;
                }
                send_one(sender, route.target, roi, &data.with_addressing(route.addressing))
            }
        }
    }
}

fn send_one(sender: &dyn MessageSender, target: ProtocolId, roi: Roi, data: &RemoteObjectMessageData) -> bool {
    match sender.send_to(target, roi, data) {
        Ok(()) => true,
        Err(e) => {
            warn!("Forwarding {:?} to protocol {} failed: {}", roi, target, e);
            false
        }
    }
}

/// Sends to every target, also after a failure
fn send_all(sender: &dyn MessageSender, targets: &[ProtocolId], roi: Roi, data: &RemoteObjectMessageData) -> bool {
    targets
        .iter()
        .fold(true, |ok, target| send_one(sender, *target, roi, data) && ok)
}

fn remap(
    positions: &mut HashMap<i32, Position>,
    sender: &dyn MessageSender,
    others: &[ProtocolId],
    role: Role,
    roi: Roi,
    data: &RemoteObjectMessageData,
) -> bool {
    let addressing = data.addressing;

    match (role, roi) {
        (Role::A, Roi::SoundObjectPositionX | Roi::SoundObjectPositionY) => {
            let combined = match single_float(data) {
                Some(value) => {
                    let position = positions.entry(addressing.key()).or_default();
                    if roi == Roi::SoundObjectPositionX {
                        position.x = value;
                    } else {
                        position.y = value;
                    }
                    RemoteObjectMessageData::from_floats(addressing, &[position.x, position.y])
                }
                None => RemoteObjectMessageData::empty(addressing),
            };
            send_all(sender, others, Roi::SoundObjectPositionXY, &combined)
        }

        (Role::B, Roi::SoundObjectPositionXY) => {
            let (x, y) = match data.floats().filter(|values| values.len() == 2) {
                Some(values) => {
                    let position = positions.entry(addressing.key()).or_default();
                    position.x = values[0];
                    position.y = values[1];
                    (
                        RemoteObjectMessageData::from_floats(addressing, &[values[0]]),
                        RemoteObjectMessageData::from_floats(addressing, &[values[1]]),
                    )
                }
                None => (
                    RemoteObjectMessageData::empty(addressing),
                    RemoteObjectMessageData::empty(addressing),
                ),
            };
            others.iter().fold(true, |ok, target| {
                let sent_x = send_one(sender, *target, Roi::SoundObjectPositionX, &x);
                let sent_y = send_one(sender, *target, Roi::SoundObjectPositionY, &y);
                sent_x && sent_y && ok
            })
        }

        _ => send_all(sender, others, roi, data),
    }
}

fn single_float(data: &RemoteObjectMessageData) -> Option<f32> {
    data.floats()
        .filter(|values| values.len() == 1)
        .map(|values| values[0])
}

/// Source and destination channel counts for a message from `role`
fn channel_counts(role: Role, a_channels: u16, b_channels: u16) -> (u16, u16) {
    match role {
        Role::A => (a_channels, b_channels),
        Role::B => (b_channels, a_channels),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MuxRoute {
    target: ProtocolId,
    addressing: RemoteObjectAddressing,
    absolute: i32,
}

fn mux_route(
    source_index: usize,
    source_channels: u16,
    destination_channels: u16,
    destinations: &[ProtocolId],
    addressing: RemoteObjectAddressing,
) -> Option<MuxRoute> {
    if source_channels == 0 || destination_channels == 0 {
        return None;
    }

    let local = addressing.primary as i32;
    if local < 1 || local > source_channels as i32 {
        return None;
    }

    let absolute = source_index as i32 * source_channels as i32 + local;
    let per_destination = destination_channels as i32;
    let target = *destinations.get(((absolute - 1) / per_destination) as usize)?;
    let channel = i16::try_from(1 + (absolute - 1) % per_destination).ok()?;

    Some(MuxRoute {
        target,
        addressing: addressing.with_primary(channel),
        absolute,
    })
}

/// Store `data` under `key` and report whether it differs from what was there
fn remember_if_changed(
    cache: &mut ValueCache,
    key: ValueKey,
    precision: f32,
    data: &RemoteObjectMessageData,
) -> bool {
    if !data.has_values() {
        return true;
    }
    if !value_changed(precision, cache.get(&key), data) {
        debug!("Filtered unchanged {:?} on channel {}", key.0, key.1);
        return false;
    }
    cache.insert(key, data.clone());
    true
}

fn value_changed(
    precision: f32,
    previous: Option<&RemoteObjectMessageData>,
    current: &RemoteObjectMessageData,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if previous.value_type != current.value_type
        || previous.value_count != current.value_count
        || previous.payload.len() != current.payload.len()
    {
        return true;
    }

    match current.value_type {
        RemoteObjectValueType::Float => {
            if precision == 0.0 {
                return true;
            }
            match (previous.floats(), current.floats()) {
                (Some(old), Some(new)) => old
                    .iter()
                    .zip(new.iter())
                    .any(|(a, b)| quantize(*a, precision) != quantize(*b, precision)),
                _ => true,
            }
        }
        RemoteObjectValueType::Int => previous.payload != current.payload,
        RemoteObjectValueType::String | RemoteObjectValueType::None => true,
    }
}

fn quantize(value: f32, precision: f32) -> f64 {
    (value as f64 / precision as f64).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingSender {
        sent: RefCell<Vec<(ProtocolId, Roi, RemoteObjectMessageData)>>,
        failing: HashSet<ProtocolId>,
    }

    impl RecordingSender {
        fn failing(ids: &[ProtocolId]) -> Self {
            Self {
                failing: ids.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn take(&self) -> Vec<(ProtocolId, Roi, RemoteObjectMessageData)> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl MessageSender for RecordingSender {
        fn send_to(&self, protocol_id: ProtocolId, roi: Roi, data: &RemoteObjectMessageData) -> Result<()> {
            self.sent.borrow_mut().push((protocol_id, roi, data.clone()));
            if self.failing.contains(&protocol_id) {
                return Err(BridgeError::Send("test failure".to_string()));
            }
            Ok(())
        }
    }

    fn handling(data: ObjectHandlingData, a: &[ProtocolId], b: &[ProtocolId]) -> ObjectDataHandling {
        let mut handling = ObjectDataHandling::new(&data).expect("valid mode");
        for id in a {
            handling.add_protocol_a_id(*id);
        }
        for id in b {
            handling.add_protocol_b_id(*id);
        }
        handling
    }

    fn mode(mode: ObjectHandlingMode, a: &[ProtocolId], b: &[ProtocolId]) -> ObjectDataHandling {
        handling(ObjectHandlingData::new(mode), a, b)
    }

    fn mux(mode: ObjectHandlingMode, n: u16, m: u16, a: &[ProtocolId], b: &[ProtocolId]) -> ObjectDataHandling {
        handling(ObjectHandlingData::multiplexed(mode, n, m), a, b)
    }

    fn at(channel: i16) -> RemoteObjectAddressing {
        RemoteObjectAddressing::new(channel, 1)
    }

    fn spread(channel: i16, value: f32) -> RemoteObjectMessageData {
        RemoteObjectMessageData::from_floats(at(channel), &[value])
    }

    // ========================================================================
    // Directional modes
    // ========================================================================

    #[test]
    fn test_invalid_mode_has_no_strategy() {
        assert!(ObjectDataHandling::new(&ObjectHandlingData::new(ObjectHandlingMode::Invalid)).is_none());
    }

    #[test]
    fn test_bypass_forwards_to_opposite_role() {
        let mut h = mode(ObjectHandlingMode::Bypass, &[1, 2], &[3, 4]);
        let sender = RecordingSender::default();
        let data = spread(1, 0.5);

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &data));
        let sent = sender.take();
        assert_eq!(sent.len(), 2);
        assert_eq!((sent[0].0, sent[1].0), (3, 4));
        assert!(sent.iter().all(|(_, roi, d)| *roi == Roi::SoundObjectSpread && *d == data));

        assert!(h.on_received_message(&sender, 4, Roi::SoundObjectSpread, &data));
        let targets: Vec<ProtocolId> = sender.take().iter().map(|s| s.0).collect();
        assert_eq!(targets, vec![1, 2]);
    }

    #[test]
    fn test_unknown_source_rejected() {
        let mut h = mode(ObjectHandlingMode::Bypass, &[1], &[2]);
        let sender = RecordingSender::default();
        assert!(!h.on_received_message(&sender, 99, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert!(sender.take().is_empty());
    }

    #[test]
    fn test_send_failure_still_reaches_other_targets() {
        let mut h = mode(ObjectHandlingMode::Bypass, &[1], &[2, 3]);
        let sender = RecordingSender::failing(&[2]);
        assert!(!h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        let targets: Vec<ProtocolId> = sender.take().iter().map(|s| s.0).collect();
        assert_eq!(targets, vec![2, 3]);
    }

    #[test]
    fn test_forward_only_drops_reverse_direction() {
        let mut h = mode(ObjectHandlingMode::ForwardAToBOnly, &[1], &[2]);
        let sender = RecordingSender::default();

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert!(sender.take().is_empty());

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert_eq!(sender.take()[0].0, 2);
    }

    #[test]
    fn test_reverse_only_drops_forward_direction() {
        let mut h = mode(ObjectHandlingMode::ReverseBToAOnly, &[1], &[2]);
        let sender = RecordingSender::default();

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert!(sender.take().is_empty());

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert_eq!(sender.take()[0].0, 1);
    }

    // ========================================================================
    // Remapping
    // ========================================================================

    #[test]
    fn test_remap_combines_x_and_y() {
        let mut h = mode(ObjectHandlingMode::RemapAXYToBXY, &[1], &[2]);
        let sender = RecordingSender::default();

        let x = RemoteObjectMessageData::from_floats(at(3), &[0.25]);
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectPositionX, &x));
        let sent = sender.take();
        assert_eq!(sent[0].1, Roi::SoundObjectPositionXY);
        assert_eq!(sent[0].2.floats(), Some(vec![0.25, 0.0]));

        let y = RemoteObjectMessageData::from_floats(at(3), &[0.75]);
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectPositionY, &y));
        let sent = sender.take();
        assert_eq!(sent[0].2.floats(), Some(vec![0.25, 0.75]));
        assert_eq!(sent[0].2.addressing, at(3));

        // other channels keep their own position
        let y4 = RemoteObjectMessageData::from_floats(at(4), &[0.5]);
        h.on_received_message(&sender, 1, Roi::SoundObjectPositionY, &y4);
        assert_eq!(sender.take()[0].2.floats(), Some(vec![0.0, 0.5]));
    }

    #[test]
    fn test_remap_splits_xy_for_each_a_protocol() {
        let mut h = mode(ObjectHandlingMode::RemapAXYToBXY, &[1, 2], &[3]);
        let sender = RecordingSender::default();

        let xy = RemoteObjectMessageData::from_floats(at(2), &[0.1, 0.9]);
        assert!(h.on_received_message(&sender, 3, Roi::SoundObjectPositionXY, &xy));

        let sent: Vec<(ProtocolId, Roi, Option<Vec<f32>>)> = sender
            .take()
            .into_iter()
            .map(|(id, roi, d)| (id, roi, d.floats()))
            .collect();
        assert_eq!(
            sent,
            vec![
                (1, Roi::SoundObjectPositionX, Some(vec![0.1])),
                (1, Roi::SoundObjectPositionY, Some(vec![0.9])),
                (2, Roi::SoundObjectPositionX, Some(vec![0.1])),
                (2, Roi::SoundObjectPositionY, Some(vec![0.9])),
            ]
        );

        // B updates feed the cache used for A updates
        let x = RemoteObjectMessageData::from_floats(at(2), &[0.3]);
        h.on_received_message(&sender, 1, Roi::SoundObjectPositionX, &x);
        assert_eq!(sender.take()[0].2.floats(), Some(vec![0.3, 0.9]));
    }

    #[test]
    fn test_remap_queries_and_other_objects() {
        let mut h = mode(ObjectHandlingMode::RemapAXYToBXY, &[1], &[2]);
        let sender = RecordingSender::default();

        let query = RemoteObjectMessageData::empty(at(1));
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectPositionX, &query));
        let sent = sender.take();
        assert_eq!(sent[0].1, Roi::SoundObjectPositionXY);
        assert!(!sent[0].2.has_values());

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        let sent = sender.take();
        assert_eq!((sent[0].0, sent[0].1), (1, Roi::SoundObjectSpread));
    }

    // ========================================================================
    // Multiplexing
    // ========================================================================

    #[test]
    fn test_mux_maps_channels_across_protocols() {
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 16, 32, &[1, 2], &[3]);
        let sender = RecordingSender::default();

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(3, 0.5)));
        let sent = sender.take();
        assert_eq!(sent[0].0, 3);
        assert_eq!(sent[0].2.addressing, at(19));

        assert!(h.on_received_message(&sender, 3, Roi::SoundObjectSpread, &spread(19, 0.5)));
        let sent = sender.take();
        assert_eq!(sent[0].0, 2);
        assert_eq!(sent[0].2.addressing, at(3));
    }

    #[test]
    fn test_mux_splits_into_smaller_protocols() {
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 16, 8, &[1], &[2, 3]);
        let sender = RecordingSender::default();

        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(8, 0.5));
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(9, 0.5));
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(16, 0.5));
        let routes: Vec<(ProtocolId, i16)> = sender
            .take()
            .iter()
            .map(|(id, _, d)| (*id, d.addressing.primary))
            .collect();
        assert_eq!(routes, vec![(2, 8), (3, 1), (3, 8)]);
    }

    #[test]
    fn test_mux_round_trip_is_identity() {
        let a = [1, 2, 3];
        let b = [4, 5];
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 8, 12, &a, &b);
        let sender = RecordingSender::default();

        for (index, source) in a.iter().enumerate() {
            for channel in 1..=8 {
                assert!(h.on_received_message(&sender, *source, Roi::SoundObjectSpread, &spread(channel, 0.5)));
                let (target, _, forwarded) = sender.take().remove(0);
                assert!(b.contains(&target), "source {} channel {}", index, channel);

                assert!(h.on_received_message(&sender, target, Roi::SoundObjectSpread, &forwarded));
                let (back, _, returned) = sender.take().remove(0);
                assert_eq!(back, *source);
                assert_eq!(returned.addressing, at(channel));
            }
        }
    }

    #[test]
    fn test_mux_boundaries() {
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 16, 16, &[1, 2], &[3]);
        let sender = RecordingSender::default();

        // last channel of the first A protocol
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(16, 0.5)));
        assert_eq!(sender.take()[0].2.addressing.primary, 16);

        // second A protocol runs past the only B protocol
        assert!(!h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        // channels outside the configured range
        assert!(!h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(17, 0.5)));
        assert!(!h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(0, 0.5)));
        assert!(sender.take().is_empty());
    }

    #[test]
    fn test_mux_zero_channels_rejected() {
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 0, 16, &[1], &[2]);
        let sender = RecordingSender::default();
        assert!(!h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
    }

    #[test]
    fn test_mux_unaddressed_goes_to_all() {
        let mut h = mux(ObjectHandlingMode::MuxNAToMB, 16, 16, &[1], &[2, 3]);
        let sender = RecordingSender::default();
        let ping = RemoteObjectMessageData::empty(RemoteObjectAddressing::invalid());
        assert!(h.on_received_message(&sender, 1, Roi::HeartbeatPing, &ping));
        assert_eq!(sender.take().len(), 2);
    }

    // ========================================================================
    // Value filtering
    // ========================================================================

    fn filter(precision: f32) -> ObjectDataHandling {
        let mut data = ObjectHandlingData::new(ObjectHandlingMode::ForwardOnlyValueChanges);
        data.precision = precision;
        handling(data, &[1], &[2])
    }

    #[test]
    fn test_value_filter_drops_repeats() {
        let mut h = filter(0.001);
        let sender = RecordingSender::default();

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert_eq!(sender.take().len(), 1);

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert!(sender.take().is_empty());

        // within precision
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5004)));
        assert!(sender.take().is_empty());

        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.6)));
        assert_eq!(sender.take().len(), 1);

        // other channels and objects are tracked separately
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(2, 0.6)));
        assert!(h.on_received_message(&sender, 1, Roi::ReverbSendGain, &spread(1, 0.6)));
        assert_eq!(sender.take().len(), 2);
    }

    #[test]
    fn test_value_filter_suppresses_echo() {
        let mut h = filter(0.001);
        let sender = RecordingSender::default();

        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5));
        assert_eq!(sender.take()[0].0, 2);

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert!(sender.take().is_empty());
    }

    #[test]
    fn test_value_filter_zero_precision_forwards_everything() {
        let mut h = filter(0.0);
        let sender = RecordingSender::default();
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5));
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5));
        assert_eq!(sender.take().len(), 2);
    }

    #[test]
    fn test_value_filter_ints_and_queries() {
        let mut h = filter(0.001);
        let sender = RecordingSender::default();
        let mode = |v| RemoteObjectMessageData::from_ints(at(1), &[v]);

        h.on_received_message(&sender, 1, Roi::SoundObjectDelayMode, &mode(1));
        h.on_received_message(&sender, 1, Roi::SoundObjectDelayMode, &mode(1));
        h.on_received_message(&sender, 1, Roi::SoundObjectDelayMode, &mode(2));
        assert_eq!(sender.take().len(), 2);

        let query = RemoteObjectMessageData::empty(at(1));
        h.on_received_message(&sender, 1, Roi::SoundObjectDelayMode, &query);
        h.on_received_message(&sender, 1, Roi::SoundObjectDelayMode, &query);
        assert_eq!(sender.take().len(), 2);
    }

    #[test]
    fn test_value_filter_type_change_counts_as_change() {
        let mut h = filter(0.001);
        let sender = RecordingSender::default();
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 1.0));
        h.on_received_message(
            &sender,
            1,
            Roi::SoundObjectSpread,
            &RemoteObjectMessageData::from_ints(at(1), &[1]),
        );
        assert_eq!(sender.take().len(), 2);
    }

    #[test]
    fn test_value_changed_quantization() {
        for (a, b, p) in [(0.1f32, 0.1004f32, 0.001f32), (1.0, 1.04, 0.1), (-2.0, -2.0, 0.5)] {
            let old = spread(1, a);
            let new = spread(1, b);
            let expected = quantize(a, p) != quantize(b, p);
            assert_eq!(value_changed(p, Some(&old), &new), expected);
        }
    }

    #[test]
    fn test_reset_clears_cached_state() {
        let mut h = filter(0.001);
        let sender = RecordingSender::default();
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5));
        h.reset();
        h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5));
        assert_eq!(sender.take().len(), 2);
        assert_eq!(h.protocol_a_ids(), &[1]);

        let mut h = mode(ObjectHandlingMode::RemapAXYToBXY, &[1], &[2]);
        let x = RemoteObjectMessageData::from_floats(at(1), &[0.25]);
        h.on_received_message(&sender, 1, Roi::SoundObjectPositionX, &x);
        h.reset();
        let y = RemoteObjectMessageData::from_floats(at(1), &[0.75]);
        h.on_received_message(&sender, 1, Roi::SoundObjectPositionY, &y);
        assert_eq!(sender.take()[1].2.floats(), Some(vec![0.0, 0.75]));
    }

    #[test]
    fn test_mux_value_filter() {
        let mut data = ObjectHandlingData::multiplexed(ObjectHandlingMode::MuxNAToMBWithValFilter, 8, 16);
        data.precision = 0.01;
        let mut h = handling(data, &[1, 2], &[3]);
        let sender = RecordingSender::default();

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.5)));
        let sent = sender.take();
        assert_eq!(sent[0].2.addressing, at(9));

        assert!(h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(1, 0.501)));
        assert!(sender.take().is_empty());

        // same local channel on the other A protocol is a different absolute channel
        assert!(h.on_received_message(&sender, 1, Roi::SoundObjectSpread, &spread(1, 0.5)));
        assert_eq!(sender.take()[0].2.addressing, at(1));

        assert!(!h.on_received_message(&sender, 2, Roi::SoundObjectSpread, &spread(9, 0.5)));
    }
}
