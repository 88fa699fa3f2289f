//! Telnet/RFC2217 step of the TCP-family pipeline: option negotiation,
//! COM-port configuration and the baud-control hooks used by the autobauder.

use std::sync::Arc;

use devio_rs_protocol::telnet::{
    CPO_CONTROL_DTR_OFF, CPO_CONTROL_HARDWARE, CPO_CONTROL_NONE, CPO_CONTROL_RTS_OFF,
    CPO_CONTROL_XONOFF, CPO_DATASIZE_EIGHT, CPO_PARITY_NONE, CPO_PURGE_BOTH, CPO_STOPSIZE_ONE,
    CpoCommand, Negotiation, RxFilter, TelnetEvent, encode_cpo, escape_iac, option_name,
};
use devio_rs_protocol::{
    SerialFlow, SerialFraming, StreamError, StreamOpts, StreamPath, user_agent,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::autobaud::BaudProbe;
use crate::base::StreamShared;

/// Negotiate telnet options, configure the remote COM port and (when
/// requested) autobaud. Returns the stateful in-band filter to carry into
/// the connected loop.
pub(crate) async fn establish_session<S: AsyncRead + AsyncWrite + Unpin>(
    shared: &Arc<StreamShared>,
    io: &mut S,
    opts: &StreamOpts,
) -> Result<RxFilter, (StreamError, String)> {
    let StreamPath::Telnet(path) = &opts.path else {
        return Err((StreamError::DeviceFail, "not a telnet path".to_owned()));
    };

    shared.set_state_connecting("negotiate");
    let mut negotiation = Negotiation::client_offer();
    io.write_all(&negotiation.request_bytes())
        .await
        .map_err(|e| (StreamError::ConnLost, format!("request: {e}")))?;
    io.flush()
        .await
        .map_err(|e| (StreamError::ConnLost, format!("request: {e}")))?;

    let mut filter = RxFilter::new();
    let mut buf = [0u8; 1024];
    while !negotiation.is_complete() {
        let n = io
            .read(&mut buf)
            .await
            .map_err(|e| (StreamError::ConnLost, format!("read: {e}")))?;
        if n == 0 {
            return Err((StreamError::ConnLost, "read: eof".to_owned()));
        }
        // User data before the negotiation completes is discarded
        let (_kept, events) = filter.filter(&mut buf[..n]);
        for event in events {
            if let TelnetEvent::Negotiate { code, option } = event {
                trace!("telnet < {} {}", code.as_str(), option_name(option));
                negotiation.process(code, option);
            }
        }
    }

    let refused = negotiation.refused();
    if !refused.is_empty() {
        return Err((
            StreamError::TelnetError,
            format!("options failed: {}", refused.join(", ")),
        ));
    }

    configure_port(io, shared, path.framing, path.flow)
        .await
        .map_err(|_| (StreamError::TelnetError, "config port failed".to_owned()))?;

    if path.autobaud != devio_rs_protocol::AutobaudMode::None {
        let mut probe = TelnetProbe::new(io, &mut filter, shared);
        if !crate::autobaud::run(shared, &mut probe, path.autobaud).await {
            return Err((StreamError::ConnectFail, "autobaud fail".to_owned()));
        }
    }

    Ok(filter)
}

/// The fixed, ordered COM-port-option sequence sent once all options are
/// agreed: rate, framing, flow, control lines cleared, notifications
/// silenced, signatures exchanged, buffers purged.
async fn configure_port<S: AsyncWrite + Unpin>(
    io: &mut S,
    shared: &StreamShared,
    framing: SerialFraming,
    flow: SerialFlow,
) -> std::io::Result<()> {
    let flow_payload = match flow {
        SerialFlow::Off => CPO_CONTROL_NONE,
        SerialFlow::Sw => CPO_CONTROL_XONOFF,
        SerialFlow::Hw => CPO_CONTROL_HARDWARE,
    };
    let framing_payloads = match framing {
        SerialFraming::Mode8N1 => (CPO_DATASIZE_EIGHT, CPO_PARITY_NONE, CPO_STOPSIZE_ONE),
    };

    let sequence: [(CpoCommand, u32); 12] = [
        (CpoCommand::SetBaudrate, shared.baudrate()),
        (CpoCommand::SetDatasize, framing_payloads.0),
        (CpoCommand::SetParity, framing_payloads.1),
        (CpoCommand::SetStopsize, framing_payloads.2),
        (CpoCommand::SetControl, flow_payload),
        // See the serial transport: some receivers need DTR/RTS cleared
        (CpoCommand::SetControl, CPO_CONTROL_DTR_OFF),
        (CpoCommand::SetControl, CPO_CONTROL_RTS_OFF),
        (CpoCommand::NotifyLinestate, 0),
        (CpoCommand::NotifyModemstate, 0),
        (CpoCommand::Signature, 0),
        (CpoCommand::PollSignature, 0),
        (CpoCommand::PurgeData, CPO_PURGE_BOTH),
    ];

    let agent = user_agent();
    for (command, payload) in sequence {
        let Some(bytes) = encode_cpo(command, payload, &agent) else {
            return Err(std::io::Error::other("unencodable com port option"));
        };
        trace!("telnet > {}", command.as_str());
        io.write_all(&bytes).await?;
    }
    io.flush().await
}

/// Apply a new baud rate to the remote port and commit it into the options.
pub(crate) async fn set_baudrate<S: AsyncWrite + Unpin>(
    io: &mut S,
    shared: &StreamShared,
    baudrate: u32,
) -> bool {
    let Some(bytes) = encode_cpo(CpoCommand::SetBaudrate, baudrate, "") else {
        return false;
    };
    if io.write_all(&bytes).await.is_err() || io.flush().await.is_err() {
        return false;
    }
    debug!("set baudrate {baudrate}");
    shared.commit_baudrate(baudrate);
    true
}

/// Autobaud strategy over a telnet/RFC2217 connection: rate changes go out as
/// COM-port-options, probe data is IAC-escaped, and received bytes pass
/// through the in-band filter before the probe parser sees them.
pub(crate) struct TelnetProbe<'a, S> {
    io: &'a mut S,
    filter: &'a mut RxFilter,
    shared: &'a StreamShared,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> TelnetProbe<'a, S> {
    pub fn new(io: &'a mut S, filter: &'a mut RxFilter, shared: &'a StreamShared) -> Self {
        Self { io, filter, shared }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> BaudProbe for TelnetProbe<'_, S> {
    async fn set_baud(&mut self, baudrate: u32) -> bool {
        set_baudrate(self.io, self.shared, baudrate).await
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.io.write_all(&escape_iac(data)).await?;
        self.io.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = self.io.read(buf).await?;
            if n == 0 {
                return Ok(0);
            }
            let (kept, _events) = self.filter.filter(&mut buf[..n]);
            if kept > 0 {
                return Ok(kept);
            }
            // Only control bytes; keep reading
        }
    }
}
