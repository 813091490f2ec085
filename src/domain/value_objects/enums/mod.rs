pub mod entity_kinds;
