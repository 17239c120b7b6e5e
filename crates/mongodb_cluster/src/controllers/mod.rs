pub mod automation_config;
pub mod cluster_controller;
pub mod statefulset;
