//! Implements the "Device" USB descriptor.
//!
//! This descriptor is described in USB2 section 9.6.1.

/// A USB Device Descriptor.
///
/// Provides information that applies globally to the device and all of its
/// configurations. A given device has exactly one device descriptor.
///
/// USB2 Table 9-8 describes the packet offsets of these fields.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDescriptor {
    /// The length of this descriptor in bytes (bLength).
    pub length: u8,
    /// The descriptor type (bDescriptorType). See [super::DescriptorKind].
    pub kind: u8,
    /// The USB standard version in binary-coded decimal (bcdUSB).
    pub usb: u16,
    /// The USB class code (bDeviceClass). Zero means each interface carries
    /// its own class information.
    pub class: u8,
    /// The USB subclass code (bDeviceSubClass), qualified by `class`.
    pub sub_class: u8,
    /// The device protocol (bDeviceProtocol), qualified by class/subclass.
    pub protocol: u8,
    /// The maximum packet size for endpoint zero (bMaxPacketSize0).
    pub packet_size: u8,
    /// The USB vendor ID (idVendor).
    pub vendor: u16,
    /// The USB product ID (idProduct).
    pub product: u16,
    /// The device release number in binary-coded decimal (bcdDevice).
    pub release: u16,
    /// Index of the string descriptor naming the manufacturer (iManufacturer).
    pub manufacturer_str: u8,
    /// Index of the string descriptor naming the product (iProduct).
    pub product_str: u8,
    /// Index of the string descriptor holding the serial number (iSerialNumber).
    pub serial_str: u8,
    /// The number of configurations (bNumConfigurations).
    pub configurations: u8,
}

unsafe impl plain::Plain for DeviceDescriptor {}

/// A Device Qualifier descriptor.
///
/// Specific to USB2 dual-speed devices: describes the fields of the device
/// descriptor that would change if the device operated at its other speed.
/// See USB2 section 9.6.2, packet offsets in Table 9-9.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceQualifier {
    /// The length of this descriptor in bytes (bLength).
    pub length: u8,
    /// The descriptor type (bDescriptorType).
    pub kind: u8,
    /// The USB standard version in binary-coded decimal (bcdUSB).
    pub usb: u16,
    /// The USB class code at the other speed (bDeviceClass).
    pub class: u8,
    /// The USB subclass code at the other speed (bDeviceSubClass).
    pub sub_class: u8,
    /// The device protocol at the other speed (bDeviceProtocol).
    pub protocol: u8,
    /// Maximum endpoint-zero packet size at the other speed (bMaxPacketSize0).
    pub packet_size: u8,
    /// Number of configurations at the other speed (bNumConfigurations).
    pub configurations: u8,
    /// Reserved, must be zero (bReserved).
    pub _rsvd: u8,
}

unsafe impl plain::Plain for DeviceQualifier {}
