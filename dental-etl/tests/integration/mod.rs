mod common;
mod connection_factory_test;
mod connection_manager_test;
mod schema_converter_test;
