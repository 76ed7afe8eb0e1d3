pub mod num_index;
