//! Pluggable collaborators used when talking to the server: naming transforms,
//! packers and url builders.

pub mod naming;
pub mod packer;
pub mod url;

pub use naming::{IdentityNaming, NameTransform, SnakeCaseNaming};
pub use packer::{EnvelopePacker, Packer, RawPacker, Unpacked};
pub use url::{DefaultUrlBuilder, UrlBuilder};
