mod image;

pub(crate) use self::image::{ImageRow, check_quality};
