//! Last known value per setting category.

use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;

use crate::nothing::{command::Category, command::Response, models::CapabilitySet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
   pub value: Response,
   pub updated_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
   capabilities: CapabilitySet,
   entries: HashMap<Category, CachedValue>,
}

impl Inner {
   fn admits(&self, category: Category) -> bool {
      category
         .required_capability()
         .is_none_or(|cap| self.capabilities.contains(cap))
   }
}

/// Per-session cache of setting values.
///
/// Categories the model lacks are never stored. Only the dispatcher mutates
/// the cache; everything else reads.
#[derive(Debug, Default)]
pub struct StateCache {
   inner: Mutex<Inner>,
}

impl StateCache {
   pub fn new(capabilities: CapabilitySet) -> Self {
      Self {
         inner: Mutex::new(Inner {
            capabilities,
            entries: HashMap::new(),
         }),
      }
   }

   pub fn get(&self, category: Category) -> Option<CachedValue> {
      self.inner.lock().entries.get(&category).cloned()
   }

   /// Stores `value` under its category. Returns whether the stored value changed.
   pub fn put(&self, value: Response) -> bool {
      let category = value.category();
      if matches!(value, Response::Ack(_)) {
         return false;
      }
      let mut inner = self.inner.lock();
      if !inner.admits(category) {
         return false;
      }
      let updated_at = Instant::now();
      match inner.entries.insert(category, CachedValue {
         value: value.clone(),
         updated_at,
      }) {
         Some(previous) => previous.value != value,
         None => true,
      }
   }

   pub fn invalidate(&self, category: Category) {
      self.inner.lock().entries.remove(&category);
   }

   pub fn invalidate_all(&self) {
      self.inner.lock().entries.clear();
   }

   /// Drops every entry and adopts a new capability set.
   pub fn reset(&self, capabilities: CapabilitySet) {
      let mut inner = self.inner.lock();
      inner.capabilities = capabilities;
      inner.entries.clear();
   }

   pub fn len(&self) -> usize {
      self.inner.lock().entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }
}
