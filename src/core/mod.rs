//! Decoding and reusable tracking primitives.

pub mod activity;
pub mod decode;
pub mod mac;
pub mod view;
pub mod window;

pub use activity::{Activity, Expired};
pub use decode::{decode, LinkKind};
pub use mac::Mac;
pub use view::{LayerKind, View, ViewPair};
pub use window::Window;
