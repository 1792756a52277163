//! # Binding Mode Selector
//!
//! Turns an ordered list of draw keys into draw plans:
//!
//! ```text
//! keys  [A, B, A, C, A]   instancing requested
//!        │
//!        ▼
//! plans  Instanced A [0, 2, 4]   one draw, 3 instances
//!        Legacy    B [1]         one draw
//!        Legacy    C [3]         one draw
//! ```
//!
//! Plans follow the first appearance of each key; members keep submission
//! order, so member `i` of an instanced plan is GPU instance `i`.

use std::collections::HashMap;
use std::hash::Hash;

use orrery_core::BindingMode;

/// One or more draws sharing a key and a binding mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawPlan<K> {
    /// How the members' transforms are bound.
    pub mode: BindingMode,
    /// Shared draw key (mesh identity).
    pub key: K,
    /// Indices into the selector input, in submission order.
    pub members: Vec<usize>,
}

impl<K> DrawPlan<K> {
    /// Number of draws the plan issues.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        match self.mode {
            BindingMode::Legacy => self.members.len(),
            BindingMode::Instanced => usize::from(!self.members.is_empty()),
        }
    }
}

/// Chooses a binding mode per draw.
///
/// Without instancing, or with a single draw, every key becomes its own
/// legacy plan. Otherwise keys are split into one plan per distinct key and
/// a plan with a single member is drawn legacy.
#[must_use]
pub fn select<K: Eq + Hash + Copy>(keys: &[K], instancing: bool) -> Vec<DrawPlan<K>> {
    Selector::default().select(keys, instancing).to_vec()
}

/// [`select`] with its plans and key map kept between calls.
///
/// Once it has seen a frame's worth of keys, selecting a frame of the same
/// shape reuses every allocation.
#[derive(Debug)]
pub struct Selector<K> {
    plans: Vec<DrawPlan<K>>,
    used: usize,
    by_key: HashMap<K, usize>,
}

impl<K> Default for Selector<K> {
    fn default() -> Self {
        Self {
            plans: Vec::new(),
            used: 0,
            by_key: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy> Selector<K> {
    /// Plans `keys` as [`select`] does. The result lives until the next call.
    pub fn select(&mut self, keys: &[K], instancing: bool) -> &[DrawPlan<K>] {
        self.used = 0;
        self.by_key.clear();

        if !instancing || keys.len() < 2 {
            for (index, &key) in keys.iter().enumerate() {
                self.next_plan(BindingMode::Legacy, key).members.push(index);
            }
            return &self.plans[..self.used];
        }

        for (index, &key) in keys.iter().enumerate() {
            let plan = match self.by_key.get(&key) {
                Some(&plan) => plan,
                None => {
                    let plan = self.used;
                    self.next_plan(BindingMode::Instanced, key);
                    self.by_key.insert(key, plan);
                    plan
                }
            };
            self.plans[plan].members.push(index);
        }

        if self.used > 1 {
            tracing::trace!(keys = self.used, "Split mixed batch by draw key");
        }

        let plans = &mut self.plans[..self.used];
        for plan in plans.iter_mut() {
            if plan.members.len() == 1 {
                plan.mode = BindingMode::Legacy;
            }
        }
        plans
    }

    fn next_plan(&mut self, mode: BindingMode, key: K) -> &mut DrawPlan<K> {
        if self.used == self.plans.len() {
            self.plans.push(DrawPlan {
                mode,
                key,
                members: Vec::new(),
            });
        } else {
            let plan = &mut self.plans[self.used];
            plan.mode = mode;
            plan.key = key;
            plan.members.clear();
        }
        self.used += 1;
        &mut self.plans[self.used - 1]
    }
}
