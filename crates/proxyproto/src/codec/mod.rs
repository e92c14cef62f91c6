//! Binary framing for requests and responses.
//!
//! Every message is sent as a single frame: a big endian `u32` holding the
//! length of the body, followed by the body. Bodies are a flat sequence of
//! fixed width integers, length prefixed strings, and tagged values.
pub mod client;
pub mod server;

use std::collections::BTreeMap;
use std::str;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;

use crate::errinfo::{ErrorInfo, ErrorKind};
use crate::errors::{ProtoError, Result};
use crate::messages::{MessageKind, Request, Response};
use crate::value::Value;

/// Default upper bound on the size of a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length of the frame header.
const HEADER_LEN: usize = 4;

mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const DECIMAL: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const DATE: u8 = 7;
    pub const TIME: u8 = 8;
    pub const TIMESTAMP: u8 = 9;
}

trait BufProtoMut: BufMut {
    /// Put a length prefixed string.
    fn put_string(&mut self, s: &str);

    /// Put a presence byte, followed by the string if present.
    fn put_opt_string(&mut self, s: Option<&str>);

    fn put_bytes_prefixed(&mut self, b: &[u8]);

    fn put_value(&mut self, v: &Value);
}

impl<B: BufMut> BufProtoMut for B {
    fn put_string(&mut self, s: &str) {
        self.put_bytes_prefixed(s.as_bytes());
    }

    fn put_opt_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.put_u8(1);
                self.put_string(s);
            }
            None => self.put_u8(0),
        }
    }

    fn put_bytes_prefixed(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.put_slice(b);
    }

    fn put_value(&mut self, v: &Value) {
        match v {
            Value::Null => self.put_u8(tag::NULL),
            Value::Bool(v) => {
                self.put_u8(tag::BOOL);
                self.put_u8(*v as u8);
            }
            Value::Int(v) => {
                self.put_u8(tag::INT);
                self.put_i64(*v);
            }
            Value::Float(v) => {
                self.put_u8(tag::FLOAT);
                self.put_f64(*v);
            }
            Value::Decimal(v) => {
                self.put_u8(tag::DECIMAL);
                self.put_string(&v.to_string());
            }
            Value::String(v) => {
                self.put_u8(tag::STRING);
                self.put_string(v);
            }
            Value::Bytes(v) => {
                self.put_u8(tag::BYTES);
                self.put_bytes_prefixed(v);
            }
            Value::Date(v) => {
                self.put_u8(tag::DATE);
                self.put_i32(v.num_days_from_ce());
            }
            Value::Time(v) => {
                self.put_u8(tag::TIME);
                self.put_u32(v.num_seconds_from_midnight());
                self.put_u32(v.nanosecond());
            }
            Value::Timestamp(v) => {
                let utc = v.and_utc();
                self.put_u8(tag::TIMESTAMP);
                self.put_i64(utc.timestamp());
                self.put_u32(utc.timestamp_subsec_nanos());
            }
        }
    }
}

/// Read only view over a frame body with bounds checked reads.
#[derive(Debug)]
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(ProtoError::UnexpectedEof {
                needed: n - self.buf.len(),
            });
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.get_i32())
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.get_u32())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.get_i64())
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.get_f64())
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(len)
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        let b = &self.buf[..len];
        self.advance(len);
        Ok(b)
    }

    fn read_string(&mut self) -> Result<String> {
        Ok(str::from_utf8(self.read_bytes()?)?.to_string())
    }

    fn read_opt_string(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read a collection length, rejecting lengths that can't possibly fit in
    /// the remaining bytes given each element needs at least `min_elem`.
    fn read_count(&mut self, min_elem: usize) -> Result<usize> {
        let n = self.read_u32()? as usize;
        self.ensure(n.saturating_mul(min_elem))?;
        Ok(n)
    }

    fn read_value(&mut self) -> Result<Value> {
        Ok(match self.read_u8()? {
            tag::NULL => Value::Null,
            tag::BOOL => Value::Bool(self.read_bool()?),
            tag::INT => Value::Int(self.read_i64()?),
            tag::FLOAT => Value::Float(self.read_f64()?),
            tag::DECIMAL => {
                let s = self.read_string()?;
                Value::Decimal(s.parse::<Decimal>()?)
            }
            tag::STRING => Value::String(self.read_string()?),
            tag::BYTES => Value::Bytes(self.read_bytes()?.to_vec()),
            tag::DATE => {
                let days = self.read_i32()?;
                let date = NaiveDate::from_num_days_from_ce_opt(days)
                    .ok_or(ProtoError::InvalidTemporal("date"))?;
                Value::Date(date)
            }
            tag::TIME => {
                let secs = self.read_u32()?;
                let nanos = self.read_u32()?;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .ok_or(ProtoError::InvalidTemporal("time"))?;
                Value::Time(time)
            }
            tag::TIMESTAMP => {
                let secs = self.read_i64()?;
                let nanos = self.read_u32()?;
                let ts = DateTime::from_timestamp(secs, nanos)
                    .ok_or(ProtoError::InvalidTemporal("timestamp"))?;
                Value::Timestamp(ts.naive_utc())
            }
            other => return Err(ProtoError::InvalidValueTag(other)),
        })
    }

    fn finish(&self) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(ProtoError::TrailingBytes(self.buf.len()));
        }
        Ok(())
    }
}

impl Buf for Cursor<'_> {
    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn chunk(&self) -> &[u8] {
        self.buf
    }

    fn advance(&mut self, cnt: usize) {
        self.buf = &self.buf[cnt..]
    }
}

/// Split a complete frame body off the front of `src`.
///
/// Returns `None` if a full frame hasn't been received yet.
fn split_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<BytesMut>> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    // Index directly into the buffer to avoid advancing before the full frame
    // is available.
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_frame_size {
        return Err(ProtoError::MsgTooLarge {
            size: len,
            limit: max_frame_size,
        });
    }

    if src.len() < HEADER_LEN + len {
        src.reserve(HEADER_LEN + len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_LEN);
    Ok(Some(src.split_to(len)))
}

/// Write a frame, filling in the length once the body has been written.
fn write_frame<F>(dst: &mut BytesMut, max_frame_size: usize, body: F) -> Result<()>
where
    F: FnOnce(&mut BytesMut),
{
    let len_idx = dst.len();
    dst.put_u32(0);

    body(dst);

    let len = dst.len() - len_idx - HEADER_LEN;
    if len > max_frame_size {
        dst.truncate(len_idx);
        return Err(ProtoError::MsgTooLarge {
            size: len,
            limit: max_frame_size,
        });
    }
    dst[len_idx..len_idx + HEADER_LEN].copy_from_slice(&(len as u32).to_be_bytes());

    Ok(())
}

fn encode_request_body(req: &Request, dst: &mut BytesMut) {
    dst.put_u8(req.kind.code());
    dst.put_opt_string(req.connection_id.as_ref().map(|id| id.as_str()));
    dst.put_opt_string(req.statement_id.as_ref().map(|id| id.as_str()));
    dst.put_opt_string(req.result_set_id.as_ref().map(|id| id.as_str()));
    dst.put_opt_string(req.sql.as_deref());
    dst.put_i32(req.fetch_size);

    dst.put_u32(req.params.len() as u32);
    for (pos, val) in &req.params {
        dst.put_u32(*pos);
        dst.put_value(val);
    }

    dst.put_u32(req.extra.len() as u32);
    for (key, val) in &req.extra {
        dst.put_string(key);
        dst.put_value(val);
    }
}

fn decode_request_body(buf: &mut Cursor<'_>) -> Result<Request> {
    let kind = MessageKind::try_from(buf.read_u8()?)?;
    let connection_id = buf.read_opt_string()?.map(Into::into);
    let statement_id = buf.read_opt_string()?.map(Into::into);
    let result_set_id = buf.read_opt_string()?.map(Into::into);
    let sql = buf.read_opt_string()?;
    let fetch_size = buf.read_i32()?;

    let num_params = buf.read_count(5)?;
    let mut params = BTreeMap::new();
    for _ in 0..num_params {
        let pos = buf.read_u32()?;
        let val = buf.read_value()?;
        params.insert(pos, val);
    }

    let num_extra = buf.read_count(5)?;
    let mut extra = BTreeMap::new();
    for _ in 0..num_extra {
        let key = buf.read_string()?;
        let val = buf.read_value()?;
        extra.insert(key, val);
    }

    buf.finish()?;

    Ok(Request {
        kind,
        connection_id,
        statement_id,
        result_set_id,
        sql,
        params,
        fetch_size,
        extra,
    })
}

fn encode_error_info(info: &ErrorInfo, dst: &mut BytesMut) {
    dst.put_u8(info.kind().code());
    dst.put_string(info.message());
    dst.put_opt_string(info.sql_state());
    dst.put_i32(info.error_code());
    dst.put_u32(info.stack_trace().len() as u32);
    for frame in info.stack_trace() {
        dst.put_string(frame);
    }
    dst.put_opt_string(info.cause_message());
}

fn decode_error_info(buf: &mut Cursor<'_>) -> Result<ErrorInfo> {
    let kind = ErrorKind::try_from(buf.read_u8()?)?;
    let message = buf.read_string()?;
    let sql_state = buf.read_opt_string()?;
    let error_code = buf.read_i32()?;
    let num_frames = buf.read_count(4)?;
    let mut frames = Vec::with_capacity(num_frames);
    for _ in 0..num_frames {
        frames.push(buf.read_string()?);
    }
    let cause = buf.read_opt_string()?;

    Ok(ErrorInfo::from_parts(
        kind, message, sql_state, error_code, frames, cause,
    ))
}

fn encode_response_body(resp: &Response, dst: &mut BytesMut) {
    dst.put_u8(resp.kind.code());

    dst.put_u32(resp.rows.len() as u32);
    for row in &resp.rows {
        dst.put_u32(row.len() as u32);
        for val in row {
            dst.put_value(val);
        }
    }

    match &resp.column_names {
        Some(names) => {
            dst.put_u8(1);
            dst.put_u32(names.len() as u32);
            for name in names {
                dst.put_string(name);
            }
        }
        None => dst.put_u8(0),
    }

    dst.put_i64(resp.update_count);
    dst.put_u8(resp.has_more_rows as u8);
    dst.put_opt_string(resp.statement_id.as_ref().map(|id| id.as_str()));
    dst.put_opt_string(resp.result_set_id.as_ref().map(|id| id.as_str()));

    match resp.timestamp {
        Some(ts) => {
            dst.put_u8(1);
            dst.put_i64(ts);
        }
        None => dst.put_u8(0),
    }

    match &resp.error {
        Some(info) => {
            dst.put_u8(1);
            encode_error_info(info, dst);
        }
        None => dst.put_u8(0),
    }
}

fn decode_response_body(buf: &mut Cursor<'_>) -> Result<Response> {
    let kind = MessageKind::try_from(buf.read_u8()?)?;

    let num_rows = buf.read_count(4)?;
    let mut rows = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let num_cols = buf.read_count(1)?;
        let mut row = Vec::with_capacity(num_cols);
        for _ in 0..num_cols {
            row.push(buf.read_value()?);
        }
        rows.push(row);
    }

    let column_names = if buf.read_bool()? {
        let n = buf.read_count(4)?;
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            names.push(buf.read_string()?);
        }
        Some(names)
    } else {
        None
    };

    let update_count = buf.read_i64()?;
    let has_more_rows = buf.read_bool()?;
    let statement_id = buf.read_opt_string()?.map(Into::into);
    let result_set_id = buf.read_opt_string()?.map(Into::into);
    let timestamp = if buf.read_bool()? {
        Some(buf.read_i64()?)
    } else {
        None
    };
    let error = if buf.read_bool()? {
        Some(decode_error_info(buf)?)
    } else {
        None
    };

    buf.finish()?;

    match (kind, &error) {
        (MessageKind::Exception, None) => {
            return Err(ProtoError::MalformedResponse(
                "exception response without error info",
            ));
        }
        (k, Some(_)) if k != MessageKind::Exception => {
            return Err(ProtoError::MalformedResponse(
                "error info on a non-exception response",
            ));
        }
        _ => (),
    }

    Ok(Response {
        kind,
        rows,
        column_names,
        update_count,
        has_more_rows,
        statement_id,
        result_set_id,
        timestamp,
        error,
    })
}
