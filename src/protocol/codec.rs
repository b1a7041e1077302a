//! Length-prefixed CBOR codec for [libp2p::request_response].
//!
//! Every message is an unsigned varint length followed by that many bytes of
//! CBOR. Exactly one message is written per direction.

use std::{io, marker::PhantomData};

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::{request_response::Codec, StreamProtocol};
use serde::{de::DeserializeOwned, Serialize};

/// Largest message accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Length-prefixed CBOR codec.
pub struct LpCbor<Req, Resp> {
    phantom: PhantomData<(Req, Resp)>,
}

impl<Req, Resp> Default for LpCbor<Req, Resp> {
    fn default() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<Req, Resp> Clone for LpCbor<Req, Resp> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

#[async_trait]
impl<Req, Resp> Codec for LpCbor<Req, Resp>
where
    Req: Send + Sync + Serialize + DeserializeOwned,
    Resp: Send + Sync + Serialize + DeserializeOwned,
{
    type Protocol = StreamProtocol;
    type Request = Req;
    type Response = Resp;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_message(io).await
    }

    async fn read_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_message(io).await
    }

    async fn write_request<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_message(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_message(io, &res).await
    }
}

/// Serialize `message` to CBOR.
///
/// Errors are [io::ErrorKind::InvalidInput].
pub fn encode<M: Serialize>(message: &M) -> io::Result<Vec<u8>> {
    cbor4ii::serde::to_vec(Vec::new(), message)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, format!("{error:?}")))
}

/// Deserialize a CBOR message.
///
/// Errors are [io::ErrorKind::InvalidData].
pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> io::Result<M> {
    cbor4ii::serde::from_slice(bytes)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, format!("{error:?}")))
}

async fn read_message<T, M>(io: &mut T) -> io::Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let bytes = read_length_prefixed(io, MAX_MESSAGE_SIZE).await?;
    if bytes.is_empty() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }

    decode(&bytes)
}

async fn write_message<T, M>(io: &mut T, message: &M) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let bytes = encode(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {} bytes exceeds {MAX_MESSAGE_SIZE}", bytes.len()),
        ));
    }

    write_length_prefixed(io, &bytes).await
}

pub(crate) async fn read_length_prefixed<T>(io: &mut T, max_size: usize) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin,
{
    let len = unsigned_varint::aio::read_usize(&mut *io)
        .await
        .map_err(Into::<io::Error>::into)?;

    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {len} bytes exceeds {max_size}"),
        ));
    }

    let mut buffer = vec![0; len];
    io.read_exact(&mut buffer).await?;

    Ok(buffer)
}

pub(crate) async fn write_length_prefixed<T>(io: &mut T, bytes: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let mut prefix = unsigned_varint::encode::usize_buffer();
    io.write_all(unsigned_varint::encode::usize(bytes.len(), &mut prefix))
        .await?;
    io.write_all(bytes).await?;
    io.flush().await
}
