//! Syntactic SDP guards applied at the caller's option.
//!
//! The relay never inspects SDP bodies; endpoints may run these checks
//! before sending an offer or answer. The profile forbids trickle ICE
//! and requires candidates to be present in the body.

use thiserror::Error;

/// Violations of the SWAP SDP profile.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    /// The body contains no `m=` media section.
    #[error("SDP body has no media section")]
    NoMediaSection,
    /// The body declares `a=ice-options:trickle`.
    #[error("SDP body declares trickle ICE")]
    TrickleForbidden,
    /// The body carries no `a=candidate:` lines.
    #[error("SDP body has no candidate lines")]
    NoCandidates,
}

/// Checks the profile guards over an opaque SDP body.
///
/// # Errors
///
/// Returns the first violated guard.
pub fn check_sdp(body: &str) -> Result<(), SdpError> {
    let mut has_media = false;
    let mut has_candidate = false;
    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.starts_with("m=") {
            has_media = true;
        }
        if line.starts_with("a=ice-options:") && line.contains("trickle") {
            return Err(SdpError::TrickleForbidden);
        }
        if line.starts_with("a=candidate:") {
            has_candidate = true;
        }
    }
    if !has_media {
        return Err(SdpError::NoMediaSection);
    }
    if !has_candidate {
        return Err(SdpError::NoCandidates);
    }
    Ok(())
}
