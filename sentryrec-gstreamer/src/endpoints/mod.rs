pub mod smart_record;
