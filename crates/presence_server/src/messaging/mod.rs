//! Binary frame handling: tags, codecs, roster snapshots and routing.

pub mod codec;
pub mod roster;
pub mod router;
pub mod types;

pub use codec::{decode_client_frame, stamp_identity, Heartbeat};
pub use roster::{decode_roster, encode_roster, RosterEntry, RosterRecord};
pub use router::{route_client_frame, RouteOutcome};
pub use types::{ClientMessage, MessageTag};
