/// The HID class descriptor (HID 1.11 section 6.2.1).
///
/// Declares exactly one subordinate class descriptor, the report descriptor.
/// Devices with physical descriptors would carry further (kind, length)
/// pairs; this layout fixes the count at one.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct HidDescriptor {
    pub length: u8,
    pub kind: u8,
    /// HID class specification release in binary-coded decimal (bcdHID).
    pub hid: u16,
    pub country_code: u8,
    /// Number of subordinate class descriptors (bNumDescriptors).
    pub descriptors: u8,
    /// Type of the one subordinate descriptor, [super::desc_ty::HID_REPORT].
    pub report_kind: u8,
    /// Length of the report descriptor in bytes (wDescriptorLength).
    pub report_length: u16,
}

unsafe impl plain::Plain for HidDescriptor {}
