pub mod alerts;
pub mod clock;
pub mod delays;
pub mod feed;
pub mod fetch;
pub mod matcher;
pub mod output;
pub mod pipeline;
pub mod schedule;
pub mod stats;
pub mod tables;
pub mod vehicles;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
