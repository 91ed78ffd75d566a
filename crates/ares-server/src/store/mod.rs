pub mod crypto;
pub mod db;
pub mod model;

pub use crypto::{Cipher, CipherError, CiphertextFault};
pub use db::{ConsumeResult, Store, StoreError};
pub use model::SecretRecord;
