pub mod client_dictionary;

pub use client_dictionary::{ClientDictionary, ClientRegistry};
