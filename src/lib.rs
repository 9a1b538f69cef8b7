#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    future_incompatible,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod manager;
pub mod model;
pub mod node;
pub mod player;
pub mod snowflake;
pub mod track;

pub use self::{
    adapter::ChatAdapter,
    manager::{Manager, ManagerError, ManagerOptions},
    node::{Node, NodeConfig, NodeError},
    player::{PlayOptions, Player, PlayerError, PlayerOptions},
    snowflake::Snowflake,
    track::{Track, TrackPartial},
};
