#![forbid(unsafe_code)]

pub mod json_fmt;
pub mod password;
pub mod theme;
pub mod yaml_lint;
