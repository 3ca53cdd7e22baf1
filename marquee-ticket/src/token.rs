use rand::RngCore;

const TOKEN_BYTES: usize = 24;

/// Cryptographically random QR credential, hex-encoded. Global uniqueness
/// is backed by the unique index on `tickets.qr_token`; at 192 bits of
/// entropy a collision retry never fires in practice.
pub fn generate_qr_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(TOKEN_BYTES * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
