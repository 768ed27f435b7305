/// Built-in class ids carried in each object header.
///
/// Ids from `User` upward belong to host-registered classes; a context keeps
/// one prototype slot per id below its configured class count.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JSObjectClass {
    Object = 0,
    Array = 1,
    Function = 2,
    String = 3,
    Float64 = 4,
    Global = 5,
    User = 6,
}

impl JSObjectClass {
    pub const COUNT: u16 = JSObjectClass::User as u16;

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Object),
            1 => Some(Self::Array),
            2 => Some(Self::Function),
            3 => Some(Self::String),
            4 => Some(Self::Float64),
            5 => Some(Self::Global),
            x if x >= Self::User as u8 => Some(Self::User),
            _ => None,
        }
    }

    pub const fn is_user(id: u8) -> bool {
        id >= JSObjectClass::User as u8
    }
}

/// Lifecycle of a context slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContextState {
    Active,
    Closing,
    Freed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_collapse_to_user() {
        assert_eq!(JSObjectClass::from_id(1), Some(JSObjectClass::Array));
        assert_eq!(JSObjectClass::from_id(6), Some(JSObjectClass::User));
        assert_eq!(JSObjectClass::from_id(200), Some(JSObjectClass::User));
        assert!(JSObjectClass::is_user(7));
        assert!(!JSObjectClass::is_user(JSObjectClass::Global as u8));
    }
}
