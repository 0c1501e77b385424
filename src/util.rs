use std::ops::RangeFrom;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind, ParseError};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult, InputIter, InputLength, Slice};

use crate::Error;

pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

/// `opaque data<0..2^8-1>`
pub fn vec8(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    take(len)(input)
}

/// `opaque data<0..2^16-1>`
pub fn vec16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len)(input)
}

/// `opaque data<0..2^24-1>`
pub fn vec24(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u24(input)?;
    take(len)(input)
}

/// Run `f` over the whole of `input`. Trailing bytes are an error.
pub fn parse_all<'a, T, F>(input: &'a [u8], what: &str, mut f: F) -> Result<T, Error>
where
    F: FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
{
    match f(input) {
        Ok((rest, value)) if rest.is_empty() => Ok(value),
        Ok((rest, _)) => Err(Error::decode(format!(
            "{}: {} trailing bytes",
            what,
            rest.len()
        ))),
        Err(e) => Err(Error::decode(format!("{}: {}", what, e))),
    }
}

/// A failure that stops `many0` style loops instead of backtracking.
pub fn fail<T>(input: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(Err::Failure(nom::error::Error::new(input, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u48() {
        let (rest, v) = be_u48::<_, nom::error::Error<&[u8]>>(&[0, 0, 0, 0, 1, 2, 9][..]).unwrap();
        assert_eq!(v, 0x0102);
        assert_eq!(rest, &[9]);
    }

    #[test]
    fn length_prefixed() {
        let (rest, v) = vec16(&[0, 2, 7, 8, 9]).unwrap();
        assert_eq!(v, &[7, 8]);
        assert_eq!(rest, &[9]);
        assert!(vec24(&[0, 0, 5, 1]).is_err());
    }

    #[test]
    fn parse_all_rejects_trailing() {
        assert_eq!(parse_all(&[1, 5], "x", vec8).unwrap(), &[5]);
        assert!(matches!(
            parse_all(&[1, 5, 6], "x", vec8),
            Err(Error::ProtocolViolation { .. })
        ));
    }
}
