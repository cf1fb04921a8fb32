pub mod command;
pub mod config;
pub mod execution_node;
pub mod highlight;
pub mod location;
pub mod plan;
pub mod result_error;
pub mod rsync;
pub mod shell;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
