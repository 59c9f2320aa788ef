pub mod activity;
pub mod conversation;
pub mod delivery;
pub mod notification;
pub mod photo;
pub mod rbac;
pub mod sale;
pub mod support;
pub mod user;
pub mod vehicle;
pub mod visit;
