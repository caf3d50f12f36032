use crate::jvm;

#[derive(Debug)]
pub enum Error {
    /// Fatal problem with a method body
    Jvm(jvm::Error),

    /// Listing line that doesn't make sense
    Parse { line: usize, message: String },

    Io(std::io::Error),
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Jvm(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
