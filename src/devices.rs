//! Display names for well-known U2F authenticator models.

/// Known U2F tokens, keyed by USB vendor and product id.
const KNOWN_DEVICES: &[(u16, u16, &str)] = &[
    // Yubico
    (0x1050, 0x0113, "Yubico YubiKey NEO FIDO"),
    (0x1050, 0x0114, "Yubico YubiKey NEO OTP+FIDO"),
    (0x1050, 0x0115, "Yubico YubiKey NEO FIDO+CCID"),
    (0x1050, 0x0116, "Yubico YubiKey NEO OTP+FIDO+CCID"),
    (0x1050, 0x0120, "Yubico Security Key"),
    (0x1050, 0x0402, "Yubico YubiKey 4 FIDO"),
    (0x1050, 0x0403, "Yubico YubiKey 4 OTP+FIDO"),
    (0x1050, 0x0406, "Yubico YubiKey 4 FIDO+CCID"),
    (0x1050, 0x0407, "Yubico YubiKey 4 OTP+FIDO+CCID"),
    (0x1050, 0x0410, "Yubico YubiKey Plus"),
    // Feitian / Hypersecu
    (0x096e, 0x0850, "Feitian ePass FIDO"),
    (0x096e, 0x0858, "Feitian ePass FIDO-NFC"),
    (0x096e, 0x0880, "Hypersecu HyperFIDO"),
    // Others
    (0x2581, 0xf1d0, "Plug-up Card"),
    (0x1e0d, 0xf1d0, "Neowave Keydo AES"),
    (0x20a0, 0x4287, "Nitrokey FIDO U2F"),
    (0x0483, 0xa2ca, "SoloKeys Solo"),
    (0x18d1, 0x5026, "Google Titan Security Key"),
];

/// Looks up the display name for a vendor/product pair. Unknown devices
/// return `None`.
pub fn product_name(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    KNOWN_DEVICES
        .iter()
        .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
        .map(|(_, _, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_device() {
        assert_eq!(product_name(0x1050, 0x0120), Some("Yubico Security Key"));
    }

    #[test]
    fn unknown_device() {
        assert_eq!(product_name(0xdead, 0xbeef), None);
        // Vendor match alone is not enough.
        assert_eq!(product_name(0x1050, 0xffff), None);
    }
}
