//! TCP driver for one country's client session.
//!
//! The driver mirrors the server's line protocol: handshake first, then the
//! roster in paced batches, then the ranking and final requests. Every
//! interaction runs under [`CLIENT_IO_TIMEOUT`]; the server side applies no
//! per-message deadline, so the client is the impatient party.

use std::time::Duration;

use log::{debug, info};
use shared::{BATCH_SIZE, CLIENT_IO_TIMEOUT, FINAL_REQUEST, REQUEST_RANKING};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::ClientError;

/// One client session bound to a country.
pub struct CompetitionClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    country_id: i32,
    batch_pause: Duration,
    roster: Vec<(i32, i32)>,
}

impl CompetitionClient {
    /// Connects to the server and prepares the session.
    ///
    /// Nagle is disabled so each small batch goes out as soon as it is
    /// written; the pacing between batches is the client's job, not the
    /// kernel's.
    pub async fn connect(
        addr: &str,
        country_id: i32,
        batch_pause: Duration,
        roster: Vec<(i32, i32)>,
    ) -> Result<Self, ClientError> {
        let stream = time::timeout(CLIENT_IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Deadline(CLIENT_IO_TIMEOUT))??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            country_id,
            batch_pause,
            roster,
        })
    }

    /// Runs the whole competition sequence for this country.
    ///
    /// Streams the roster, prints the current ranking, then requests and
    /// prints the finalized results.
    pub async fn run(mut self) -> Result<(), ClientError> {
        self.send_handshake().await?;
        self.send_batches().await?;

        let ranking = self.request_ranking().await?;
        println!("Current ranking:\n{ranking}");

        let report = self.request_final().await?;
        println!("Final results for country {}:\n{report}", self.country_id);
        Ok(())
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let write = async {
            self.writer.write_all(payload).await?;
            self.writer.flush().await
        };
        time::timeout(CLIENT_IO_TIMEOUT, write)
            .await
            .map_err(|_| ClientError::Deadline(CLIENT_IO_TIMEOUT))?
            .map_err(ClientError::from)
    }

    async fn send_handshake(&mut self) -> Result<(), ClientError> {
        self.write_frame(format!("{}\n", self.country_id).as_bytes())
            .await
    }

    /// Sends the roster as batches of [`BATCH_SIZE`] records, one line per
    /// record and one write per batch, pausing between batches.
    async fn send_batches(&mut self) -> Result<(), ClientError> {
        let batches: Vec<String> = self
            .roster
            .chunks(BATCH_SIZE)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|(id, score)| format!("{id},{score}\n"))
                    .collect()
            })
            .collect();

        let total = batches.len();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                time::sleep(self.batch_pause).await;
            }
            self.write_frame(batch.as_bytes()).await?;
            debug!(
                "country {}: sent batch {}/{}",
                self.country_id,
                index + 1,
                total
            );
        }
        info!(
            "country {}: roster of {} record(s) sent",
            self.country_id,
            self.roster.len()
        );
        Ok(())
    }

    /// Requests the current country ranking.
    ///
    /// The payload has no terminator of its own: the client reads until the
    /// next newline under the deadline, then takes whatever further ranking
    /// lines arrived in the same frame.
    pub async fn request_ranking(&mut self) -> Result<String, ClientError> {
        self.write_frame(format!("{REQUEST_RANKING}\n").as_bytes())
            .await?;

        let mut payload = Vec::new();
        let n = time::timeout(CLIENT_IO_TIMEOUT, self.reader.read_until(b'\n', &mut payload))
            .await
            .map_err(|_| ClientError::Deadline(CLIENT_IO_TIMEOUT))??;
        if n == 0 && payload.is_empty() {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection before ranking arrived",
            )));
        }
        self.drain_buffered(&mut payload);

        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Requests the finalized dump: competitor body, blank line, country body.
    ///
    /// The dump is framed by the blank separator line and by the server
    /// closing the connection afterwards; either ends the read.
    pub async fn request_final(&mut self) -> Result<String, ClientError> {
        self.write_frame(format!("{FINAL_REQUEST}\n").as_bytes())
            .await?;

        let mut payload = Vec::new();
        let read_dump = async {
            loop {
                let n = self.reader.read_until(b'\n', &mut payload).await?;
                if n == 0 || payload.ends_with(b"\n\n") {
                    return std::io::Result::Ok(());
                }
            }
        };
        time::timeout(CLIENT_IO_TIMEOUT, read_dump)
            .await
            .map_err(|_| ClientError::Deadline(CLIENT_IO_TIMEOUT))??;
        self.drain_buffered(&mut payload);

        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Moves any bytes already buffered by the reader into `payload`.
    ///
    /// The server writes each response as a single frame, so the rest of a
    /// multi-line payload is normally sitting in the buffer already.
    fn drain_buffered(&mut self, payload: &mut Vec<u8>) {
        let buffered = self.reader.buffer();
        if !buffered.is_empty() {
            let len = buffered.len();
            payload.extend_from_slice(buffered);
            self.reader.consume(len);
        }
    }
}
