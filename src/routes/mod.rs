pub mod admin_roles;
pub mod admin_users;
pub mod auth;
pub mod conversations;
pub mod deliveries;
pub mod health;
pub mod notifications;
pub mod photos;
pub mod sales;
pub mod support;
pub mod vehicles;
pub mod visits;
