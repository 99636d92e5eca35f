mod machine;
mod table;

pub use machine::{Fired, Machine};
pub use table::{
    Blueprint, BlueprintBuilder, FAIL, FAILED, Sources, State, TERMINATED, all_except, only,
};
