//! Wire format for Conclave closed-group updates.
//!
//! Every membership or key change travels as an [`Envelope`]: a fixed 86-byte
//! raw binary header (Big Endian) followed by a CBOR payload. The header
//! carries everything needed to route and admit an update (kind, sender, group,
//! sent timestamp) so receivers can drop garbage before touching CBOR.
//!
//! # Layers
//!
//! - [`keys`]: member and group public keys
//! - [`GroupId`]: the double-encoded string identity of a group
//! - [`EnvelopeHeader`] / [`Envelope`]: transport framing
//! - [`ClosedGroupUpdate`]: the typed protocol message, one variant per
//!   [`UpdateKind`]

pub mod errors;
pub mod group_id;
pub mod keys;
pub mod payloads;

mod envelope;
mod header;
mod kind;

pub use envelope::Envelope;
pub use errors::{ProtocolError, Result};
pub use group_id::GroupId;
pub use header::EnvelopeHeader;
pub use keys::{GroupPublicKey, PublicKey};
pub use kind::UpdateKind;
pub use payloads::ClosedGroupUpdate;
