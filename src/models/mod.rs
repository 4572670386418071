pub mod cdr;
pub mod forward;
pub mod ivr;
pub mod live;
pub mod peer;
pub mod ring_group;
pub mod route;
pub mod trunk;
pub mod voicemail;

pub use cdr::*;
pub use forward::*;
pub use ivr::*;
pub use live::*;
pub use peer::*;
pub use ring_group::*;
pub use route::*;
pub use trunk::*;
pub use voicemail::*;
