pub use crate::{
    api_token::{load_or_generate_api_token, KEYMANAGER_API_TOKEN_FILENAME},
    keymanager::KeyManager,
    misc::{OperationStatus, Status, ValidatingPubkey},
    remote_keys::{RemoteKeyEntry, RemoteKeys},
};

mod api_token;
mod keymanager;
mod misc;
mod remote_keys;
