use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;
use crate::crypto::prf::VERIFY_DATA_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: [u8; VERIFY_DATA_LEN],
}

impl Finished {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, data) = take(VERIFY_DATA_LEN)(input)?;
        let mut verify_data = [0u8; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(data);
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.verify_data);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verify_data_is_twelve_bytes() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
        let (rest, f) = Finished::parse(&data).unwrap();
        assert_eq!(rest, &[13]);
        assert_eq!(f.verify_data[11], 12);

        assert!(Finished::parse(&data[..11]).is_err());
    }
}
