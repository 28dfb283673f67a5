pub mod bus;
pub mod commit;
pub mod control;
pub mod device;
pub mod device_database;
pub mod driver;
pub mod error;
pub mod hotplug;
pub mod poll;
pub mod reactor;
pub mod registry;
