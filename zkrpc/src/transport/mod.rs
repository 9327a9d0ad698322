// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Framing, serde codecs and TLS for tarpc transports.

pub mod codec;
pub mod tls;

pub use codec::Codec;
pub use tls::{ServerIdentity, TlsConfig, TlsError};
pub use tokio_rustls::{TlsAcceptor, TlsConnector};
