mod buffer;
mod driver;
mod end_to_end;
