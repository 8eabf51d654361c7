pub mod doctor;
pub mod tools_cmd;
