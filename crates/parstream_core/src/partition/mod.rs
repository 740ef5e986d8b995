pub mod chunked;
pub mod comparer;
pub mod indexed;
pub mod recipient;
pub mod stream;
