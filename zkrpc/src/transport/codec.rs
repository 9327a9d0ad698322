// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Transport serde codec.

use crate::tokio_serde::formats::{Bincode, Json};
use crate::tokio_util::codec::LengthDelimitedCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tarpc::client::{self, Channel};
use tarpc::{serde_transport, RequestName};
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport serde codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// Bincode codec using [bincode](https://docs.rs/bincode) crate.
    #[default]
    Bincode,
    /// JSON codec using [serde_json](https://docs.rs/serde_json) crate.
    Json,
}

impl Codec {
    /// Frames `io` and spawns a client dispatch task over it.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_client<Io, Req, Resp>(self, io: Io, config: client::Config) -> Channel<Req, Resp>
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        Req: RequestName + Serialize + Send + 'static,
        Resp: DeserializeOwned + Send + 'static,
    {
        let framed = LengthDelimitedCodec::builder().max_frame_length(usize::MAX).new_framed(io);
        match self {
            Codec::Bincode => client::new(config, serde_transport::new(framed, Bincode::default())).spawn(),
            Codec::Json => client::new(config, serde_transport::new(framed, Json::default())).spawn(),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(Codec::Bincode),
            "json" => Ok(Codec::Json),
            other => Err(format!("unknown codec {other:?}, expected bincode or json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Codec;

    #[test]
    fn test_from_str() {
        assert_eq!("json".parse::<Codec>(), Ok(Codec::Json));
        assert_eq!("Bincode".parse::<Codec>(), Ok(Codec::Bincode));
        assert!("cbor".parse::<Codec>().is_err());
        assert_eq!(Codec::default(), Codec::Bincode);
    }
}
