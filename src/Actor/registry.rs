//! Address-to-context table.
//!
//! The low 24 bits of an address are the local handle, the top 8 bits
//! the harbor (node) id. Handles are handed out from a monotonic index,
//! so an address comes back only after the whole 24-bit space wraps.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::context::Context;
use crate::error::{Error, Result};
use crate::MPMC::Structs::message::Address;

pub const HANDLE_MASK: u32 = 0x00ff_ffff;
pub const HANDLE_REMOTE_SHIFT: u32 = 24;

const DEFAULT_SLOT_SIZE: usize = 4;

struct Table {
    handle_index: u32,
    slots: Vec<Option<Arc<Context>>>,
    names: BTreeMap<String, Address>,
    live: usize,
}

impl Table {
    fn slot_of(&self, handle: u32) -> usize {
        handle as usize & (self.slots.len() - 1)
    }

    /// Pick a free handle, doubling the slot table when it is full.
    fn reserve(&mut self) -> Result<u32> {
        loop {
            let cap = self.slots.len();
            for i in 0..cap {
                let mut handle = self.handle_index.wrapping_add(i as u32) & HANDLE_MASK;
                if handle == 0 {
                    // 0 is Address::NONE
                    handle = 1;
                }
                let slot = self.slot_of(handle);
                if self.slots[slot].is_none() {
                    self.handle_index = handle.wrapping_add(1);
                    return Ok(handle);
                }
            }

            if cap * 2 > HANDLE_MASK as usize + 1 {
                return Err(Error::HandleSpaceExhausted { live: self.live });
            }
            let mut grown: Vec<Option<Arc<Context>>> = vec![None; cap * 2];
            for ctx in self.slots.drain(..).flatten() {
                let slot = ctx.address().local() as usize & (cap * 2 - 1);
                grown[slot] = Some(ctx);
            }
            self.slots = grown;
        }
    }
}

pub struct Registry {
    harbor: u32,
    inner: RwLock<Table>,
}

impl Registry {
    pub fn new(harbor: u8) -> Self {
        Self {
            harbor: (harbor as u32) << HANDLE_REMOTE_SHIFT,
            inner: RwLock::new(Table {
                handle_index: 1,
                slots: vec![None; DEFAULT_SLOT_SIZE],
                names: BTreeMap::new(),
                live: 0,
            }),
        }
    }

    pub fn harbor(&self) -> u32 {
        self.harbor >> HANDLE_REMOTE_SHIFT
    }

    /// True when `address` belongs to this node.
    pub fn is_local(&self, address: Address) -> bool {
        address.harbor() == self.harbor()
    }

    /// Reserve an address and store the context `make` builds for it.
    ///
    /// `make` runs under the write lock and must not call back into the
    /// registry.
    pub(crate) fn register_with<F>(&self, make: F) -> Result<Arc<Context>>
    where
        F: FnOnce(Address) -> Arc<Context>,
    {
        let mut table = self.inner.write();
        let handle = table.reserve()?;
        let ctx = make(Address(handle | self.harbor));
        let slot = table.slot_of(handle);
        table.slots[slot] = Some(Arc::clone(&ctx));
        table.live += 1;
        Ok(ctx)
    }

    pub fn grab(&self, address: Address) -> Option<Arc<Context>> {
        let table = self.inner.read();
        let slot = table.slot_of(address.local());
        match &table.slots[slot] {
            Some(ctx) if ctx.address() == address => Some(Arc::clone(ctx)),
            _ => None,
        }
    }

    /// Remove `address` and every name bound to it. The caller drops the
    /// returned context outside the lock.
    pub fn retire(&self, address: Address) -> Option<Arc<Context>> {
        let mut table = self.inner.write();
        let slot = table.slot_of(address.local());
        let owned = matches!(&table.slots[slot], Some(ctx) if ctx.address() == address);
        if !owned {
            return None;
        }
        let ctx = table.slots[slot].take();
        table.live -= 1;
        table.names.retain(|_, bound| *bound != address);
        if let Some(ctx) = &ctx {
            ctx.mark_retired();
        }
        ctx
    }

    /// Remove every service.
    pub fn retire_all(&self) -> Vec<Arc<Context>> {
        let mut table = self.inner.write();
        let retired: Vec<Arc<Context>> = table.slots.iter_mut().filter_map(Option::take).collect();
        for ctx in &retired {
            ctx.mark_retired();
        }
        table.live = 0;
        table.names.clear();
        retired
    }

    pub fn find_name(&self, name: &str) -> Option<Address> {
        self.inner.read().names.get(name).copied()
    }

    pub fn bind_name(&self, address: Address, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut table = self.inner.write();
        let slot = table.slot_of(address.local());
        if !matches!(&table.slots[slot], Some(ctx) if ctx.address() == address) {
            return Err(Error::ServiceNotFound { address });
        }
        if let Some(bound) = table.names.get(name) {
            return Err(Error::NameConflict {
                name: name.to_owned(),
                address: *bound,
            });
        }
        table.names.insert(name.to_owned(), address);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.starts_with(':') {
        "':' prefix is reserved for numeric addresses"
    } else if name.chars().any(char::is_whitespace) {
        "contains whitespace"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: name.to_owned(),
        reason: reason.into(),
    })
}
