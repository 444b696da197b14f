/// Built-in placeholder served when placeholder mode is enabled without a
/// custom image: a 24x24 gray PNG with a darker border.
pub static DEFAULT_PLACEHOLDER: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d,
    0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00, 0x18,
    0x08, 0x00, 0x00, 0x00, 0x00, 0xc5, 0x1c, 0x62, 0x24, 0x00, 0x00, 0x00,
    0x18, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0xd8, 0x8d, 0x03, 0x30,
    0xec, 0xbe, 0x8b, 0x15, 0x8c, 0x4a, 0x8c, 0x4a, 0x20, 0x4b, 0xe0, 0x00,
    0x00, 0x89, 0x00, 0xe5, 0x18, 0xb2, 0x27, 0x9a, 0x85, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];
