//! Certificate fields shared by the root and end-entity builders.

use std::time::{SystemTime, UNIX_EPOCH};

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::x509::X509Builder;

pub(crate) const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Certificates are valid for ten years.
pub const VALIDITY_DAYS: u32 = 3650;

/// Backdating of `notBefore` to tolerate clock skew between peers.
const BACKDATE_SECONDS: i64 = 24 * 60 * 60;

/// Random positive 159-bit serial number.
pub(crate) fn random_serial() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

/// Apply the `[now - 1 day, now + validity_days]` window.
pub(crate) fn set_validity(builder: &mut X509Builder, validity_days: u32) -> Result<(), ErrorStack> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let not_before = Asn1Time::from_unix((now - BACKDATE_SECONDS) as _)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(validity_days)?;
    builder.set_not_after(&not_after)
}
