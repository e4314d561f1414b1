// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Wire request/response envelopes and bodies (§6.1). Framing (the 8-byte
length prefix) lives in [`crate::codec`]; this module only encodes/decodes
the payload inside that frame.
*/

#[cfg(test)]
mod test;

use crate::codec::{read_vec, write_vec, CodecError, WireDecode, WireEncode, WireReader, WireWriter};
use crate::kernel::{Spectrum, VisQuantities};
use crate::options::OptionsSet;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Identifies what kind of client is attached (NVIS, NSPD, ...); carried
/// opaquely rather than modeled as a closed enum, since new client types can
/// appear without a protocol version bump.
pub type ClientType = i32;

/// Mints a 20-char session ID. The reference client generates this locally
/// and carries it in every request header (§4.F); it is not assigned by the
/// server.
pub fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{nanos:020x}")[..20].to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RequestType {
    CurrentSpectrum = 1,
    CurrentVisdata = 2,
    ComputeVisdata = 3,
    ComputedVisdata = 4,
    ServerType = 6,
    SpectrumMjd = 7,
    TimeRange = 10,
    CycleTimes = 11,
    SupplyUsername = 12,
    Acal = 13,
}

impl RequestType {
    fn to_code(self) -> i32 {
        self as i32
    }

    fn from_code(code: i32) -> Result<Self, CodecError> {
        Self::from_i32(code).ok_or_else(|| CodecError::DecodeValue { context: "RequestType".to_string() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum ResponseType {
    CurrentSpectrum = 1,
    CurrentVisdata = 2,
    ComputeVisdata = 3,
    ComputedVisdata = 4,
    ServerType = 6,
    SpectrumMjd = 7,
    TimeRange = 10,
    CycleTimes = 11,
    SupplyUsername = 12,
    Acal = 13,
    VisdataComputing = 20,
    VisdataComputed = 21,
    RequestUsername = 22,
    UsernameExists = 23,
    Shutdown = 24,
    AcalComputed = 25,
}

impl ResponseType {
    fn to_code(self) -> i32 {
        self as i32
    }

    fn from_code(code: i32) -> Result<Self, CodecError> {
        Self::from_i32(code).ok_or_else(|| CodecError::DecodeValue { context: "ResponseType".to_string() })
    }
}

/// Fields common to every request, regardless of body (§6.1).
#[derive(Clone, Debug, PartialEq)]
pub struct RequestHeader {
    pub client_id: String,
    pub client_username: String,
    pub client_type: ClientType,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    CurrentSpectrum { scan_number: i32 },
    CurrentVisdata,
    ComputeVisdata { options: Vec<OptionsSet> },
    ComputedVisdata,
    ServerType,
    SpectrumMjd { mjd: f64 },
    TimeRange,
    CycleTimes,
    SupplyUsername { username: String },
    Acal { options: Vec<OptionsSet>, mjds: Vec<f64>, fluxdensities: Vec<f32> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub header: RequestHeader,
    pub body: RequestBody,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match &self.body {
            RequestBody::CurrentSpectrum { .. } => RequestType::CurrentSpectrum,
            RequestBody::CurrentVisdata => RequestType::CurrentVisdata,
            RequestBody::ComputeVisdata { .. } => RequestType::ComputeVisdata,
            RequestBody::ComputedVisdata => RequestType::ComputedVisdata,
            RequestBody::ServerType => RequestType::ServerType,
            RequestBody::SpectrumMjd { .. } => RequestType::SpectrumMjd,
            RequestBody::TimeRange => RequestType::TimeRange,
            RequestBody::CycleTimes => RequestType::CycleTimes,
            RequestBody::SupplyUsername { .. } => RequestType::SupplyUsername,
            RequestBody::Acal { .. } => RequestType::Acal,
        }
    }
}

impl WireEncode for Request {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_i32(self.request_type().to_code())?;
        w.write_string(&self.header.client_id)?;
        w.write_string(&self.header.client_username)?;
        w.write_i32(self.header.client_type)?;
        match &self.body {
            RequestBody::CurrentSpectrum { scan_number } => w.write_i32(*scan_number),
            RequestBody::CurrentVisdata
            | RequestBody::ComputedVisdata
            | RequestBody::ServerType
            | RequestBody::TimeRange
            | RequestBody::CycleTimes => Ok(()),
            RequestBody::ComputeVisdata { options } => write_vec(w, options),
            RequestBody::SpectrumMjd { mjd } => w.write_f64(*mjd),
            RequestBody::SupplyUsername { username } => w.write_string(username),
            RequestBody::Acal { options, mjds, fluxdensities } => {
                write_vec(w, options)?;
                w.write_array_len(mjds.len())?;
                for m in mjds {
                    w.write_f64(*m)?;
                }
                w.write_array_len(fluxdensities.len())?;
                for f in fluxdensities {
                    w.write_f32(*f)?;
                }
                Ok(())
            }
        }
    }
}

impl WireDecode for Request {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let request_type = RequestType::from_code(r.read_i32()?)?;
        let header = RequestHeader {
            client_id: r.read_string()?,
            client_username: r.read_string()?,
            client_type: r.read_i32()?,
        };
        let body = match request_type {
            RequestType::CurrentSpectrum => RequestBody::CurrentSpectrum { scan_number: r.read_i32()? },
            RequestType::CurrentVisdata => RequestBody::CurrentVisdata,
            RequestType::ComputeVisdata => RequestBody::ComputeVisdata { options: read_vec(r, None)? },
            RequestType::ComputedVisdata => RequestBody::ComputedVisdata,
            RequestType::ServerType => RequestBody::ServerType,
            RequestType::SpectrumMjd => RequestBody::SpectrumMjd { mjd: r.read_f64()? },
            RequestType::TimeRange => RequestBody::TimeRange,
            RequestType::CycleTimes => RequestBody::CycleTimes,
            RequestType::SupplyUsername => RequestBody::SupplyUsername { username: r.read_string()? },
            RequestType::Acal => {
                let options = read_vec(r, None)?;
                let n_mjds = r.read_array_len(None)?;
                let mjds = (0..n_mjds).map(|_| r.read_f64()).collect::<Result<_, _>>()?;
                let n_fds = r.read_array_len(None)?;
                let fluxdensities = (0..n_fds).map(|_| r.read_f32()).collect::<Result<_, _>>()?;
                RequestBody::Acal { options, mjds, fluxdensities }
            }
        };
        Ok(Request { header, body })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    CurrentSpectrum { spectrum: Option<Spectrum> },
    CurrentVisdata { vis: Vec<VisQuantities> },
    ComputeVisdata,
    ComputedVisdata { vis: Vec<VisQuantities> },
    ServerType { kind: String },
    SpectrumMjd { spectrum: Option<Spectrum> },
    TimeRange { min_mjd: f64, max_mjd: f64 },
    CycleTimes { mjds: Vec<f64> },
    SupplyUsername,
    Acal { noise_diode_jy: Vec<f64> },
    VisdataComputing,
    VisdataComputed,
    RequestUsername,
    UsernameExists { options: OptionsSet },
    Shutdown,
    AcalComputed { noise_diode_jy: Vec<f64> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub client_id: String,
    pub body: ResponseBody,
}

impl Response {
    pub fn response_type(&self) -> ResponseType {
        match &self.body {
            ResponseBody::CurrentSpectrum { .. } => ResponseType::CurrentSpectrum,
            ResponseBody::CurrentVisdata { .. } => ResponseType::CurrentVisdata,
            ResponseBody::ComputeVisdata => ResponseType::ComputeVisdata,
            ResponseBody::ComputedVisdata { .. } => ResponseType::ComputedVisdata,
            ResponseBody::ServerType { .. } => ResponseType::ServerType,
            ResponseBody::SpectrumMjd { .. } => ResponseType::SpectrumMjd,
            ResponseBody::TimeRange { .. } => ResponseType::TimeRange,
            ResponseBody::CycleTimes { .. } => ResponseType::CycleTimes,
            ResponseBody::SupplyUsername => ResponseType::SupplyUsername,
            ResponseBody::Acal { .. } => ResponseType::Acal,
            ResponseBody::VisdataComputing => ResponseType::VisdataComputing,
            ResponseBody::VisdataComputed => ResponseType::VisdataComputed,
            ResponseBody::RequestUsername => ResponseType::RequestUsername,
            ResponseBody::UsernameExists { .. } => ResponseType::UsernameExists,
            ResponseBody::Shutdown => ResponseType::Shutdown,
            ResponseBody::AcalComputed { .. } => ResponseType::AcalComputed,
        }
    }
}

fn write_f64_vec<W: WireWriter>(w: &mut W, values: &[f64]) -> Result<(), CodecError> {
    w.write_array_len(values.len())?;
    for v in values {
        w.write_f64(*v)?;
    }
    Ok(())
}

fn read_f64_vec<R: WireReader>(r: &mut R) -> Result<Vec<f64>, CodecError> {
    let len = r.read_array_len(None)?;
    (0..len).map(|_| r.read_f64()).collect()
}

/// `CURRENT_SPECTRUM`/`SPECTRUM_MJD` carry a presence flag followed by the
/// spectrum itself when found (§6.1).
fn write_optional_spectrum<W: WireWriter>(w: &mut W, spectrum: Option<&Spectrum>) -> Result<(), CodecError> {
    w.write_bool(spectrum.is_some())?;
    match spectrum {
        Some(spectrum) => spectrum.encode(w),
        None => Ok(()),
    }
}

fn read_optional_spectrum<R: WireReader>(r: &mut R) -> Result<Option<Spectrum>, CodecError> {
    if r.read_bool()? {
        Ok(Some(Spectrum::decode(r)?))
    } else {
        Ok(None)
    }
}

impl WireEncode for Response {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_i32(self.response_type().to_code())?;
        w.write_string(&self.client_id)?;
        match &self.body {
            ResponseBody::CurrentSpectrum { spectrum } | ResponseBody::SpectrumMjd { spectrum } => {
                write_optional_spectrum(w, spectrum.as_ref())
            }
            ResponseBody::CurrentVisdata { vis } | ResponseBody::ComputedVisdata { vis } => write_vec(w, vis),
            ResponseBody::ComputeVisdata
            | ResponseBody::SupplyUsername
            | ResponseBody::VisdataComputing
            | ResponseBody::VisdataComputed
            | ResponseBody::RequestUsername
            | ResponseBody::Shutdown => Ok(()),
            ResponseBody::ServerType { kind } => w.write_string(kind),
            ResponseBody::TimeRange { min_mjd, max_mjd } => {
                w.write_f64(*min_mjd)?;
                w.write_f64(*max_mjd)
            }
            ResponseBody::CycleTimes { mjds } => write_f64_vec(w, mjds),
            ResponseBody::Acal { noise_diode_jy } | ResponseBody::AcalComputed { noise_diode_jy } => {
                write_f64_vec(w, noise_diode_jy)
            }
            ResponseBody::UsernameExists { options } => options.encode(w),
        }
    }
}

impl WireDecode for Response {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let response_type = ResponseType::from_code(r.read_i32()?)?;
        let client_id = r.read_string()?;
        let body = match response_type {
            ResponseType::CurrentSpectrum => ResponseBody::CurrentSpectrum { spectrum: read_optional_spectrum(r)? },
            ResponseType::CurrentVisdata => ResponseBody::CurrentVisdata { vis: read_vec(r, None)? },
            ResponseType::ComputeVisdata => ResponseBody::ComputeVisdata,
            ResponseType::ComputedVisdata => ResponseBody::ComputedVisdata { vis: read_vec(r, None)? },
            ResponseType::ServerType => ResponseBody::ServerType { kind: r.read_string()? },
            ResponseType::SpectrumMjd => ResponseBody::SpectrumMjd { spectrum: read_optional_spectrum(r)? },
            ResponseType::TimeRange => {
                ResponseBody::TimeRange { min_mjd: r.read_f64()?, max_mjd: r.read_f64()? }
            }
            ResponseType::CycleTimes => ResponseBody::CycleTimes { mjds: read_f64_vec(r)? },
            ResponseType::SupplyUsername => ResponseBody::SupplyUsername,
            ResponseType::Acal => ResponseBody::Acal { noise_diode_jy: read_f64_vec(r)? },
            ResponseType::VisdataComputing => ResponseBody::VisdataComputing,
            ResponseType::VisdataComputed => ResponseBody::VisdataComputed,
            ResponseType::RequestUsername => ResponseBody::RequestUsername,
            ResponseType::UsernameExists => ResponseBody::UsernameExists { options: OptionsSet::decode(r)? },
            ResponseType::Shutdown => ResponseBody::Shutdown,
            ResponseType::AcalComputed => ResponseBody::AcalComputed { noise_diode_jy: read_f64_vec(r)? },
        };
        Ok(Response { client_id, body })
    }
}
