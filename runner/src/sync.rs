pub mod locking;
