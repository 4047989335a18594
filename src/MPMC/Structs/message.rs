// Message and address types shared by every queue in the runtime.

use std::fmt;

/// Message types. `PTYPE_SYSTEM` is reserved for administrative control
/// (for example asking the logger to reopen its file).
pub const PTYPE_SYSTEM: u8 = 0;
pub const PTYPE_TEXT: u8 = 1;
pub const PTYPE_RESPONSE: u8 = 2;
pub const PTYPE_MULTICAST: u8 = 3;
pub const PTYPE_CLIENT: u8 = 4;
pub const PTYPE_HARBOR: u8 = 5;
pub const PTYPE_SOCKET: u8 = 6;
pub const PTYPE_ERROR: u8 = 7;
pub const PTYPE_RESERVED_LUA: u8 = 10;

/// The type lives in the upper 8 bits of the 64-bit size word.
pub const MESSAGE_TYPE_SHIFT: u32 = 56;
pub const MESSAGE_SIZE_MASK: u64 = (1u64 << MESSAGE_TYPE_SHIFT) - 1;

/// Pack a message type and a byte length into the wire size word.
#[inline]
pub fn pack_size(ptype: u8, len: usize) -> u64 {
    ((ptype as u64) << MESSAGE_TYPE_SHIFT) | (len as u64 & MESSAGE_SIZE_MASK)
}

/// Split a wire size word into `(type, length)`.
#[inline]
pub fn unpack_size(sz: u64) -> (u8, usize) {
    ((sz >> MESSAGE_TYPE_SHIFT) as u8, (sz & MESSAGE_SIZE_MASK) as usize)
}

/// Opaque 32-bit service identifier.
///
/// The top 8 bits carry the harbor (node) id, the low 24 bits the local
/// handle. `Address::NONE` (0) is reserved as "no source".
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub u32);

impl Address {
    pub const NONE: Address = Address(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Harbor id encoded in the high bits.
    pub fn harbor(self) -> u32 {
        self.0 >> crate::Actor::registry::HANDLE_REMOTE_SHIFT
    }

    /// Local handle without the harbor bits.
    pub fn local(self) -> u32 {
        self.0 & crate::Actor::registry::HANDLE_MASK
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{:08x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(:{:08x})", self.0)
    }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self {
        Address(raw)
    }
}

/// A message travelling between services.
///
/// `data` is owned: it moves into the inbox on push and is released
/// exactly once, either by the handler that consumes the message or by
/// the inbox when it is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub source: Address,
    pub session: i32,
    pub ptype: u8,
    pub data: Option<Vec<u8>>,
}

impl Message {
    pub fn new(source: Address, session: i32, ptype: u8, data: Option<Vec<u8>>) -> Self {
        Self {
            source,
            session,
            ptype,
            data,
        }
    }

    /// A text message (`PTYPE_TEXT`).
    pub fn text(source: Address, session: i32, text: impl Into<String>) -> Self {
        Self::new(source, session, PTYPE_TEXT, Some(text.into().into_bytes()))
    }

    /// Payload length in bytes (0 when there is no payload).
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// The packed size word used at the wire boundary.
    pub fn wire_size(&self) -> u64 {
        pack_size(self.ptype, self.size())
    }

    /// Rebuild a message from its wire form.
    pub fn from_wire(source: Address, session: i32, data: Option<Vec<u8>>, sz: u64) -> Self {
        let (ptype, len) = unpack_size(sz);
        let data = data.map(|mut bytes| {
            bytes.truncate(len);
            bytes
        });
        Self::new(source, session, ptype, data)
    }

    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}
