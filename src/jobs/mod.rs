pub mod redelivery;
