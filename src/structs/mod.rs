pub mod quantity_sample;
