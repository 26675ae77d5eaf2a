/// A wire-level snapshot of (or delta to) one replicated object.
///
/// Absent fields mean "same as the baseline". A present `zone_id` of 0
/// is the removal sentinel. `network_id` 0 is reserved for the wire's
/// "no state" marker and never appears in a valid state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectState {
    pub network_id: u16,
    pub zone_id: Option<u32>,
    pub real_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub position_bits: Option<u64>,
    pub rotation_bits: Option<u64>,
}

/// Wire value of `zone_id` that marks an object removed.
pub(crate) const REMOVED_ZONE_ID: u32 = 0;

impl ObjectState {
    pub fn new(network_id: u16) -> Self {
        Self {
            network_id,
            ..Self::default()
        }
    }

    pub fn with_real_id(network_id: u16, real_id: Option<u64>) -> Self {
        Self {
            network_id,
            real_id,
            ..Self::default()
        }
    }

    pub fn is_marked_removed(&self) -> bool {
        self.zone_id == Some(REMOVED_ZONE_ID)
    }

    pub fn mark_removed(&mut self) {
        self.zone_id = Some(REMOVED_ZONE_ID);
    }

    /// Builds the delta against `baseline`: only fields that differ are
    /// present. With no baseline the full state is the delta.
    pub fn delta_from(&self, baseline: Option<&ObjectState>) -> ObjectState {
        let Some(baseline) = baseline else {
            return self.clone();
        };

        let mut result = ObjectState::new(self.network_id);
        if self.zone_id != baseline.zone_id {
            result.zone_id = self.zone_id;
        }
        if self.real_id != baseline.real_id {
            result.real_id = self.real_id;
        }
        if self.parent_id != baseline.parent_id {
            result.parent_id = self.parent_id;
        }
        if self.position_bits != baseline.position_bits {
            result.position_bits = self.position_bits;
        }
        if self.rotation_bits != baseline.rotation_bits {
            result.rotation_bits = self.rotation_bits;
        }
        result
    }

    /// Copies only the fields present in `delta` onto this state.
    ///
    /// `real_id` is deliberately sticky: once bound it is part of the
    /// object's identity and an absent field never clears it.
    pub fn apply_delta(&mut self, delta: &ObjectState) {
        if let Some(zone_id) = delta.zone_id {
            self.zone_id = Some(zone_id);
        }
        if let Some(real_id) = delta.real_id {
            self.real_id = Some(real_id);
        }
        if let Some(parent_id) = delta.parent_id {
            self.parent_id = Some(parent_id);
        }
        if let Some(position_bits) = delta.position_bits {
            self.position_bits = Some(position_bits);
        }
        if let Some(rotation_bits) = delta.rotation_bits {
            self.rotation_bits = Some(rotation_bits);
        }
    }
}
