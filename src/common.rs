pub const CHANNEL_SIZE_DEFAULT: usize = 1024;

#[macro_export]
macro_rules! impl_get {
    ($name:ident, $field:ident, $start:expr, $end:expr, $type:ty) => {
        pub fn $name(&self) -> $type {
            let bytes: &[u8] = &self.$field[$start..$end];
            <$type>::from_be_bytes(bytes.try_into().unwrap())
        }
    };
}

#[macro_export]
macro_rules! impl_get_bits {
    ($name:ident, $getter:ident, $range:expr, $type:ty) => {
        pub fn $name(&self) -> $type {
            self.$getter().get_bits($range)
        }
    };
}

#[macro_export]
macro_rules! impl_get_bit {
    ($name:ident, $getter:ident, $bit_idx:expr) => {
        pub fn $name(&self) -> bool {
            self.$getter().get_bit($bit_idx)
        }
    };
}
