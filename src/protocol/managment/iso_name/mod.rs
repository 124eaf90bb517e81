//! 64-bit NAME identifying a node during address arbitration.
//!
//! # Bit layout (little-endian on the wire)
//!
//! ```text
//! Bits  0-20  (21 bits) : Unique number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : Device instance (lower part)
//! Bits 35-39  ( 5 bits) : Device instance (upper part)
//! Bits 40-47  ( 8 bits) : Device function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Device class
//! Bits 56-59  ( 4 bits) : System instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Self-configurable address
//! ```
//!
//! The numeric order of the raw value is the arbitration order: the lower
//! NAME keeps a contested address.
use core::fmt;

/// NAME carried by address claims.
///
/// ```
/// use korri_stack::protocol::managment::iso_name::IsoName;
///
/// let name = IsoName::builder()
///     .unique_number(123456)
///     .manufacturer_code(275)
///     .device_function(130)
///     .device_class(25)
///     .self_configurable(true)
///     .build();
///
/// assert_eq!(name.unique_number(), 123456);
/// assert!(name.is_self_configurable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsoName(u64);

impl IsoName {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn builder() -> IsoNameBuilder {
        IsoNameBuilder::new()
    }

    /// NAME carried by an address-claim payload, `None` when shorter than 8 bytes.
    pub fn from_claim(payload: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
        Some(Self(u64::from_le_bytes(bytes)))
    }

    /// Address-claim payload.
    #[inline]
    pub const fn to_claim(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Whether `self` keeps an address contested by `other`.
    #[inline]
    pub fn wins_over(&self, other: &IsoName) -> bool {
        self.0 < other.0
    }

    #[inline]
    pub const fn unique_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// Full 8-bit instance (upper and lower parts merged).
    #[inline]
    pub const fn device_instance(&self) -> u8 {
        ((self.0 >> 32) & 0xFF) as u8
    }

    #[inline]
    pub const fn device_function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    #[inline]
    pub const fn device_class(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    #[inline]
    pub const fn system_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (`4` for marine, `0` global).
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Whether the node may pick another address after losing arbitration.
    #[inline]
    pub const fn is_self_configurable(&self) -> bool {
        (self.0 >> 63) & 0x01 != 0
    }
}

impl From<u64> for IsoName {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<IsoName> for u64 {
    #[inline]
    fn from(name: IsoName) -> Self {
        name.raw()
    }
}

impl fmt::Display for IsoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NAME {:016X} (unique {}, mfg {}, func {}, class {}, inst {})",
            self.0,
            self.unique_number(),
            self.manufacturer_code(),
            self.device_function(),
            self.device_class(),
            self.device_instance(),
        )
    }
}

/// Builder for [`IsoName`]. Values wider than their field are truncated.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoNameBuilder {
    raw: u64,
}

impl IsoNameBuilder {
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    #[inline]
    const fn field(mut self, shift: u32, width: u32, value: u64) -> Self {
        let mask = ((1u64 << width) - 1) << shift;
        self.raw = (self.raw & !mask) | ((value << shift) & mask);
        self
    }

    /// 21 bits.
    #[inline]
    pub const fn unique_number(self, value: u32) -> Self {
        self.field(0, 21, value as u64)
    }

    /// 11 bits.
    #[inline]
    pub const fn manufacturer_code(self, value: u16) -> Self {
        self.field(21, 11, value as u64)
    }

    #[inline]
    pub const fn device_instance(self, value: u8) -> Self {
        self.field(32, 8, value as u64)
    }

    #[inline]
    pub const fn device_function(self, value: u8) -> Self {
        self.field(40, 8, value as u64)
    }

    /// 7 bits.
    #[inline]
    pub const fn device_class(self, value: u8) -> Self {
        self.field(49, 7, value as u64)
    }

    /// 4 bits.
    #[inline]
    pub const fn system_instance(self, value: u8) -> Self {
        self.field(56, 4, value as u64)
    }

    /// 3 bits.
    #[inline]
    pub const fn industry_group(self, value: u8) -> Self {
        self.field(60, 3, value as u64)
    }

    #[inline]
    pub const fn self_configurable(self, value: bool) -> Self {
        self.field(63, 1, value as u64)
    }

    #[inline]
    pub const fn build(self) -> IsoName {
        IsoName(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Every sub-field reads back what the builder wrote.
    fn test_all_fields() {
        let name = IsoName::builder()
            .unique_number(123456)
            .manufacturer_code(275)
            .device_instance(42)
            .device_function(130)
            .device_class(25)
            .system_instance(7)
            .industry_group(4)
            .self_configurable(true)
            .build();

        assert_eq!(name.unique_number(), 123456);
        assert_eq!(name.manufacturer_code(), 275);
        assert_eq!(name.device_instance(), 42);
        assert_eq!(name.device_function(), 130);
        assert_eq!(name.device_class(), 25);
        assert_eq!(name.system_instance(), 7);
        assert_eq!(name.industry_group(), 4);
        assert!(name.is_self_configurable());
    }

    #[test]
    /// Oversized values are truncated instead of spilling into neighbours.
    fn test_builder_truncates() {
        let name = IsoName::builder().unique_number(0xFFFF_FFFF).build();
        assert_eq!(name.raw(), 0x1F_FFFF);
        let name = IsoName::builder().device_class(0xFF).build();
        assert_eq!(name.device_class(), 0x7F);
        assert!(!name.is_self_configurable());
    }

    #[test]
    /// The self-configurable flag is the top bit.
    fn test_bit_63() {
        let name = IsoName::builder().self_configurable(true).build();
        assert_eq!(name.raw(), 1u64 << 63);
    }

    #[test]
    /// Claim payloads are little endian.
    fn test_claim_payload() {
        let name = IsoName::from_raw(0x8123_4567_89AB_CDEF);
        let payload = name.to_claim();
        assert_eq!(payload[0], 0xEF);
        assert_eq!(payload[7], 0x81);
        assert_eq!(IsoName::from_claim(&payload), Some(name));
        assert_eq!(IsoName::from_claim(&payload[..7]), None);
    }

    #[test]
    /// Arbitration is antisymmetric and transitive.
    fn test_arbitration_order() {
        let a = IsoName::from_raw(10);
        let b = IsoName::from_raw(20);
        let c = IsoName::from_raw(30);
        assert!(a.wins_over(&b) && !b.wins_over(&a));
        assert!(b.wins_over(&c) && a.wins_over(&c));
        assert!(!a.wins_over(&a));
    }
}
