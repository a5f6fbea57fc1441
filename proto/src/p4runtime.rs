// This file is generated by rust-protobuf 2.28.0. Do not edit
// @generated

// https://github.com/rust-lang/rust-clippy/issues/702
#![allow(unknown_lints)]
#![allow(clippy::all)]

#![allow(unused_attributes)]
#![cfg_attr(rustfmt, rustfmt::skip)]

#![allow(box_pointers)]
#![allow(dead_code)]
#![allow(missing_docs)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]
#![allow(trivial_casts)]
#![allow(unused_imports)]
#![allow(unused_results)]
//! Generated file from `p4/v1/p4runtime.proto`

/// Generated files are compatible only with the same version
/// of protobuf runtime.
// const _PROTOBUF_VERSION_CHECK: () = ::protobuf::VERSION_2_28_0;

#[derive(PartialEq,Clone,Default)]
pub struct WriteRequest {
    // message fields
    pub device_id: u64,
    pub role_id: u64,
    pub election_id: ::protobuf::SingularPtrField<Uint128>,
    pub updates: ::protobuf::RepeatedField<Update>,
    pub atomicity: WriteRequest_Atomicity,
    pub role: ::std::string::String,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a WriteRequest {
    fn default() -> &'a WriteRequest {
        <WriteRequest as ::protobuf::Message>::default_instance()
    }
}

impl WriteRequest {
    pub fn new() -> WriteRequest {
        ::std::default::Default::default()
    }

    // uint64 device_id = 1;


    pub fn get_device_id(&self) -> u64 {
        self.device_id
    }
    pub fn clear_device_id(&mut self) {
        self.device_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_device_id(&mut self, v: u64) {
        self.device_id = v;
    }

    // uint64 role_id = 2;


    pub fn get_role_id(&self) -> u64 {
        self.role_id
    }
    pub fn clear_role_id(&mut self) {
        self.role_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_role_id(&mut self, v: u64) {
        self.role_id = v;
    }

    // .p4.v1.Uint128 election_id = 3;


    pub fn get_election_id(&self) -> &Uint128 {
        self.election_id.as_ref().unwrap_or_else(|| <Uint128 as ::protobuf::Message>::default_instance())
    }
    pub fn clear_election_id(&mut self) {
        self.election_id.clear();
    }

    pub fn has_election_id(&self) -> bool {
        self.election_id.is_some()
    }

    // Param is passed by value, moved
    pub fn set_election_id(&mut self, v: Uint128) {
        self.election_id = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_election_id(&mut self) -> &mut Uint128 {
        if self.election_id.is_none() {
            self.election_id.set_default();
        }
        self.election_id.as_mut().unwrap()
    }

    // Take field
    pub fn take_election_id(&mut self) -> Uint128 {
        self.election_id.take().unwrap_or_else(|| Uint128::new())
    }

    // repeated .p4.v1.Update updates = 4;


    pub fn get_updates(&self) -> &[Update] {
        &self.updates
    }
    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }

    // Param is passed by value, moved
    pub fn set_updates(&mut self, v: ::protobuf::RepeatedField<Update>) {
        self.updates = v;
    }

    // Mutable pointer to the field.
    pub fn mut_updates(&mut self) -> &mut ::protobuf::RepeatedField<Update> {
        &mut self.updates
    }

    // Take field
    pub fn take_updates(&mut self) -> ::protobuf::RepeatedField<Update> {
        ::std::mem::replace(&mut self.updates, ::protobuf::RepeatedField::new())
    }

    // .p4.v1.WriteRequest.Atomicity atomicity = 5;


    pub fn get_atomicity(&self) -> WriteRequest_Atomicity {
        self.atomicity
    }
    pub fn clear_atomicity(&mut self) {
        self.atomicity = WriteRequest_Atomicity::CONTINUE_ON_ERROR;
    }

    // Param is passed by value, moved
    pub fn set_atomicity(&mut self, v: WriteRequest_Atomicity) {
        self.atomicity = v;
    }

    // string role = 6;


    pub fn get_role(&self) -> &str {
        &self.role
    }
    pub fn clear_role(&mut self) {
        self.role.clear();
    }

    // Param is passed by value, moved
    pub fn set_role(&mut self, v: ::std::string::String) {
        self.role = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_role(&mut self) -> &mut ::std::string::String {
        &mut self.role
    }

    // Take field
    pub fn take_role(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.role, ::std::string::String::new())
    }
}

impl ::protobuf::Message for WriteRequest {
    fn is_initialized(&self) -> bool {
        for v in &self.election_id {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.updates {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.device_id = tmp;
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.role_id = tmp;
                },
                3 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.election_id)?;
                },
                4 => {
                    ::protobuf::rt::read_repeated_message_into(wire_type, is, &mut self.updates)?;
                },
                5 => {
                    ::protobuf::rt::read_proto3_enum_with_unknown_fields_into(wire_type, is, &mut self.atomicity, 5, &mut self.unknown_fields)?
                },
                6 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.role)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.device_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.device_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.role_id != 0 {
            my_size += ::protobuf::rt::value_size(2, self.role_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if let Some(ref v) = self.election_id.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        for value in &self.updates {
            let len = value.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        };
        if self.atomicity != WriteRequest_Atomicity::CONTINUE_ON_ERROR {
            my_size += ::protobuf::rt::enum_size(5, self.atomicity);
        }
        if !self.role.is_empty() {
            my_size += ::protobuf::rt::string_size(6, &self.role);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.device_id != 0 {
            os.write_uint64(1, self.device_id)?;
        }
        if self.role_id != 0 {
            os.write_uint64(2, self.role_id)?;
        }
        if let Some(ref v) = self.election_id.as_ref() {
            os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        for v in &self.updates {
            os.write_tag(4, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        };
        if self.atomicity != WriteRequest_Atomicity::CONTINUE_ON_ERROR {
            os.write_enum(5, ::protobuf::ProtobufEnum::value(&self.atomicity))?;
        }
        if !self.role.is_empty() {
            os.write_string(6, &self.role)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> WriteRequest {
        WriteRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "device_id",
                |m: &WriteRequest| { &m.device_id },
                |m: &mut WriteRequest| { &mut m.device_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "role_id",
                |m: &WriteRequest| { &m.role_id },
                |m: &mut WriteRequest| { &mut m.role_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Uint128>>(
                "election_id",
                |m: &WriteRequest| { &m.election_id },
                |m: &mut WriteRequest| { &mut m.election_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_repeated_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Update>>(
                "updates",
                |m: &WriteRequest| { &m.updates },
                |m: &mut WriteRequest| { &mut m.updates },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeEnum<WriteRequest_Atomicity>>(
                "atomicity",
                |m: &WriteRequest| { &m.atomicity },
                |m: &mut WriteRequest| { &mut m.atomicity },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "role",
                |m: &WriteRequest| { &m.role },
                |m: &mut WriteRequest| { &mut m.role },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<WriteRequest>(
                "WriteRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static WriteRequest {
        static instance: ::protobuf::rt::LazyV2<WriteRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(WriteRequest::new)
    }
}

impl ::protobuf::Clear for WriteRequest {
    fn clear(&mut self) {
        self.device_id = 0;
        self.role_id = 0;
        self.election_id.clear();
        self.updates.clear();
        self.atomicity = WriteRequest_Atomicity::CONTINUE_ON_ERROR;
        self.role.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for WriteRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(Clone,PartialEq,Eq,Debug,Hash)]
pub enum WriteRequest_Atomicity {
    CONTINUE_ON_ERROR = 0,
    ROLLBACK_ON_ERROR = 1,
    DATAPLANE_ATOMIC = 2,
}

impl ::protobuf::ProtobufEnum for WriteRequest_Atomicity {
    fn value(&self) -> i32 {
        *self as i32
    }

    fn from_i32(value: i32) -> ::std::option::Option<WriteRequest_Atomicity> {
        match value {
            0 => ::std::option::Option::Some(WriteRequest_Atomicity::CONTINUE_ON_ERROR),
            1 => ::std::option::Option::Some(WriteRequest_Atomicity::ROLLBACK_ON_ERROR),
            2 => ::std::option::Option::Some(WriteRequest_Atomicity::DATAPLANE_ATOMIC),
            _ => ::std::option::Option::None
        }
    }

    fn values() -> &'static [Self] {
        static values: &'static [WriteRequest_Atomicity] = &[
            WriteRequest_Atomicity::CONTINUE_ON_ERROR,
            WriteRequest_Atomicity::ROLLBACK_ON_ERROR,
            WriteRequest_Atomicity::DATAPLANE_ATOMIC,
        ];
        values
    }

    fn enum_descriptor_static() -> &'static ::protobuf::reflect::EnumDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::EnumDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            ::protobuf::reflect::EnumDescriptor::new_pb_name::<WriteRequest_Atomicity>("WriteRequest.Atomicity", file_descriptor_proto())
        })
    }
}

impl ::std::marker::Copy for WriteRequest_Atomicity {
}

impl ::std::default::Default for WriteRequest_Atomicity {
    fn default() -> Self {
        WriteRequest_Atomicity::CONTINUE_ON_ERROR
    }
}

impl ::protobuf::reflect::ProtobufValue for WriteRequest_Atomicity {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Enum(::protobuf::ProtobufEnum::descriptor(self))
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct WriteResponse {
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a WriteResponse {
    fn default() -> &'a WriteResponse {
        <WriteResponse as ::protobuf::Message>::default_instance()
    }
}

impl WriteResponse {
    pub fn new() -> WriteResponse {
        ::std::default::Default::default()
    }
}

impl ::protobuf::Message for WriteResponse {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> WriteResponse {
        WriteResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let fields = ::std::vec::Vec::new();
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<WriteResponse>(
                "WriteResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static WriteResponse {
        static instance: ::protobuf::rt::LazyV2<WriteResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(WriteResponse::new)
    }
}

impl ::protobuf::Clear for WriteResponse {
    fn clear(&mut self) {
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for WriteResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for WriteResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct ReadRequest {
    // message fields
    pub device_id: u64,
    pub role: ::std::string::String,
    pub entities: ::protobuf::RepeatedField<Entity>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a ReadRequest {
    fn default() -> &'a ReadRequest {
        <ReadRequest as ::protobuf::Message>::default_instance()
    }
}

impl ReadRequest {
    pub fn new() -> ReadRequest {
        ::std::default::Default::default()
    }

    // uint64 device_id = 1;


    pub fn get_device_id(&self) -> u64 {
        self.device_id
    }
    pub fn clear_device_id(&mut self) {
        self.device_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_device_id(&mut self, v: u64) {
        self.device_id = v;
    }

    // string role = 3;


    pub fn get_role(&self) -> &str {
        &self.role
    }
    pub fn clear_role(&mut self) {
        self.role.clear();
    }

    // Param is passed by value, moved
    pub fn set_role(&mut self, v: ::std::string::String) {
        self.role = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_role(&mut self) -> &mut ::std::string::String {
        &mut self.role
    }

    // Take field
    pub fn take_role(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.role, ::std::string::String::new())
    }

    // repeated .p4.v1.Entity entities = 2;


    pub fn get_entities(&self) -> &[Entity] {
        &self.entities
    }
    pub fn clear_entities(&mut self) {
        self.entities.clear();
    }

    // Param is passed by value, moved
    pub fn set_entities(&mut self, v: ::protobuf::RepeatedField<Entity>) {
        self.entities = v;
    }

    // Mutable pointer to the field.
    pub fn mut_entities(&mut self) -> &mut ::protobuf::RepeatedField<Entity> {
        &mut self.entities
    }

    // Take field
    pub fn take_entities(&mut self) -> ::protobuf::RepeatedField<Entity> {
        ::std::mem::replace(&mut self.entities, ::protobuf::RepeatedField::new())
    }
}

impl ::protobuf::Message for ReadRequest {
    fn is_initialized(&self) -> bool {
        for v in &self.entities {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.device_id = tmp;
                },
                3 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.role)?;
                },
                2 => {
                    ::protobuf::rt::read_repeated_message_into(wire_type, is, &mut self.entities)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.device_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.device_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.role.is_empty() {
            my_size += ::protobuf::rt::string_size(3, &self.role);
        }
        for value in &self.entities {
            let len = value.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        };
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.device_id != 0 {
            os.write_uint64(1, self.device_id)?;
        }
        if !self.role.is_empty() {
            os.write_string(3, &self.role)?;
        }
        for v in &self.entities {
            os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        };
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> ReadRequest {
        ReadRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "device_id",
                |m: &ReadRequest| { &m.device_id },
                |m: &mut ReadRequest| { &mut m.device_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "role",
                |m: &ReadRequest| { &m.role },
                |m: &mut ReadRequest| { &mut m.role },
            ));
            fields.push(::protobuf::reflect::accessor::make_repeated_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Entity>>(
                "entities",
                |m: &ReadRequest| { &m.entities },
                |m: &mut ReadRequest| { &mut m.entities },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<ReadRequest>(
                "ReadRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static ReadRequest {
        static instance: ::protobuf::rt::LazyV2<ReadRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(ReadRequest::new)
    }
}

impl ::protobuf::Clear for ReadRequest {
    fn clear(&mut self) {
        self.device_id = 0;
        self.role.clear();
        self.entities.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for ReadRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct ReadResponse {
    // message fields
    pub entities: ::protobuf::RepeatedField<Entity>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a ReadResponse {
    fn default() -> &'a ReadResponse {
        <ReadResponse as ::protobuf::Message>::default_instance()
    }
}

impl ReadResponse {
    pub fn new() -> ReadResponse {
        ::std::default::Default::default()
    }

    // repeated .p4.v1.Entity entities = 1;


    pub fn get_entities(&self) -> &[Entity] {
        &self.entities
    }
    pub fn clear_entities(&mut self) {
        self.entities.clear();
    }

    // Param is passed by value, moved
    pub fn set_entities(&mut self, v: ::protobuf::RepeatedField<Entity>) {
        self.entities = v;
    }

    // Mutable pointer to the field.
    pub fn mut_entities(&mut self) -> &mut ::protobuf::RepeatedField<Entity> {
        &mut self.entities
    }

    // Take field
    pub fn take_entities(&mut self) -> ::protobuf::RepeatedField<Entity> {
        ::std::mem::replace(&mut self.entities, ::protobuf::RepeatedField::new())
    }
}

impl ::protobuf::Message for ReadResponse {
    fn is_initialized(&self) -> bool {
        for v in &self.entities {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_repeated_message_into(wire_type, is, &mut self.entities)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        for value in &self.entities {
            let len = value.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        };
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        for v in &self.entities {
            os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        };
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> ReadResponse {
        ReadResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_repeated_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Entity>>(
                "entities",
                |m: &ReadResponse| { &m.entities },
                |m: &mut ReadResponse| { &mut m.entities },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<ReadResponse>(
                "ReadResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static ReadResponse {
        static instance: ::protobuf::rt::LazyV2<ReadResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(ReadResponse::new)
    }
}

impl ::protobuf::Clear for ReadResponse {
    fn clear(&mut self) {
        self.entities.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for ReadResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for ReadResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Update {
    // message fields
    pub field_type: Update_Type,
    pub entity: ::protobuf::SingularPtrField<Entity>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Update {
    fn default() -> &'a Update {
        <Update as ::protobuf::Message>::default_instance()
    }
}

impl Update {
    pub fn new() -> Update {
        ::std::default::Default::default()
    }

    // .p4.v1.Update.Type type = 1;


    pub fn get_field_type(&self) -> Update_Type {
        self.field_type
    }
    pub fn clear_field_type(&mut self) {
        self.field_type = Update_Type::UNSPECIFIED;
    }

    // Param is passed by value, moved
    pub fn set_field_type(&mut self, v: Update_Type) {
        self.field_type = v;
    }

    // .p4.v1.Entity entity = 2;


    pub fn get_entity(&self) -> &Entity {
        self.entity.as_ref().unwrap_or_else(|| <Entity as ::protobuf::Message>::default_instance())
    }
    pub fn clear_entity(&mut self) {
        self.entity.clear();
    }

    pub fn has_entity(&self) -> bool {
        self.entity.is_some()
    }

    // Param is passed by value, moved
    pub fn set_entity(&mut self, v: Entity) {
        self.entity = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_entity(&mut self) -> &mut Entity {
        if self.entity.is_none() {
            self.entity.set_default();
        }
        self.entity.as_mut().unwrap()
    }

    // Take field
    pub fn take_entity(&mut self) -> Entity {
        self.entity.take().unwrap_or_else(|| Entity::new())
    }
}

impl ::protobuf::Message for Update {
    fn is_initialized(&self) -> bool {
        for v in &self.entity {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_proto3_enum_with_unknown_fields_into(wire_type, is, &mut self.field_type, 1, &mut self.unknown_fields)?
                },
                2 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.entity)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.field_type != Update_Type::UNSPECIFIED {
            my_size += ::protobuf::rt::enum_size(1, self.field_type);
        }
        if let Some(ref v) = self.entity.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.field_type != Update_Type::UNSPECIFIED {
            os.write_enum(1, ::protobuf::ProtobufEnum::value(&self.field_type))?;
        }
        if let Some(ref v) = self.entity.as_ref() {
            os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Update {
        Update::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeEnum<Update_Type>>(
                "type",
                |m: &Update| { &m.field_type },
                |m: &mut Update| { &mut m.field_type },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Entity>>(
                "entity",
                |m: &Update| { &m.entity },
                |m: &mut Update| { &mut m.entity },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Update>(
                "Update",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Update {
        static instance: ::protobuf::rt::LazyV2<Update> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Update::new)
    }
}

impl ::protobuf::Clear for Update {
    fn clear(&mut self) {
        self.field_type = Update_Type::UNSPECIFIED;
        self.entity.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Update {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Update {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(Clone,PartialEq,Eq,Debug,Hash)]
pub enum Update_Type {
    UNSPECIFIED = 0,
    INSERT = 1,
    MODIFY = 2,
    DELETE = 3,
}

impl ::protobuf::ProtobufEnum for Update_Type {
    fn value(&self) -> i32 {
        *self as i32
    }

    fn from_i32(value: i32) -> ::std::option::Option<Update_Type> {
        match value {
            0 => ::std::option::Option::Some(Update_Type::UNSPECIFIED),
            1 => ::std::option::Option::Some(Update_Type::INSERT),
            2 => ::std::option::Option::Some(Update_Type::MODIFY),
            3 => ::std::option::Option::Some(Update_Type::DELETE),
            _ => ::std::option::Option::None
        }
    }

    fn values() -> &'static [Self] {
        static values: &'static [Update_Type] = &[
            Update_Type::UNSPECIFIED,
            Update_Type::INSERT,
            Update_Type::MODIFY,
            Update_Type::DELETE,
        ];
        values
    }

    fn enum_descriptor_static() -> &'static ::protobuf::reflect::EnumDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::EnumDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            ::protobuf::reflect::EnumDescriptor::new_pb_name::<Update_Type>("Update.Type", file_descriptor_proto())
        })
    }
}

impl ::std::marker::Copy for Update_Type {
}

impl ::std::default::Default for Update_Type {
    fn default() -> Self {
        Update_Type::UNSPECIFIED
    }
}

impl ::protobuf::reflect::ProtobufValue for Update_Type {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Enum(::protobuf::ProtobufEnum::descriptor(self))
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Entity {
    // message oneof groups
    pub entity: ::std::option::Option<Entity_oneof_entity>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Entity {
    fn default() -> &'a Entity {
        <Entity as ::protobuf::Message>::default_instance()
    }
}

#[derive(Clone,PartialEq,Debug)]
pub enum Entity_oneof_entity {
    table_entry(TableEntry),
}

impl Entity {
    pub fn new() -> Entity {
        ::std::default::Default::default()
    }

    // .p4.v1.TableEntry table_entry = 2;


    pub fn get_table_entry(&self) -> &TableEntry {
        match self.entity {
            ::std::option::Option::Some(Entity_oneof_entity::table_entry(ref v)) => v,
            _ => <TableEntry as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_table_entry(&mut self) {
        self.entity = ::std::option::Option::None;
    }

    pub fn has_table_entry(&self) -> bool {
        match self.entity {
            ::std::option::Option::Some(Entity_oneof_entity::table_entry(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_table_entry(&mut self, v: TableEntry) {
        self.entity = ::std::option::Option::Some(Entity_oneof_entity::table_entry(v))
    }

    // Mutable pointer to the field.
    pub fn mut_table_entry(&mut self) -> &mut TableEntry {
        if let ::std::option::Option::Some(Entity_oneof_entity::table_entry(_)) = self.entity {
        } else {
            self.entity = ::std::option::Option::Some(Entity_oneof_entity::table_entry(TableEntry::new()));
        }
        match self.entity {
            ::std::option::Option::Some(Entity_oneof_entity::table_entry(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_table_entry(&mut self) -> TableEntry {
        if self.has_table_entry() {
            match self.entity.take() {
                ::std::option::Option::Some(Entity_oneof_entity::table_entry(v)) => v,
                _ => panic!(),
            }
        } else {
            TableEntry::new()
        }
    }
}

impl ::protobuf::Message for Entity {
    fn is_initialized(&self) -> bool {
        if let Some(Entity_oneof_entity::table_entry(ref v)) = self.entity {
            if !v.is_initialized() {
                return false;
            }
        }
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.entity = ::std::option::Option::Some(Entity_oneof_entity::table_entry(is.read_message()?));
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let ::std::option::Option::Some(ref v) = self.entity {
            match v {
                &Entity_oneof_entity::table_entry(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
            };
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let ::std::option::Option::Some(ref v) = self.entity {
            match v {
                &Entity_oneof_entity::table_entry(ref v) => {
                    os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
            };
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Entity {
        Entity::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, TableEntry>(
                "table_entry",
                Entity::has_table_entry,
                Entity::get_table_entry,
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Entity>(
                "Entity",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Entity {
        static instance: ::protobuf::rt::LazyV2<Entity> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Entity::new)
    }
}

impl ::protobuf::Clear for Entity {
    fn clear(&mut self) {
        self.entity = ::std::option::Option::None;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Entity {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct TableEntry {
    // message fields
    pub table_id: u32,
    pub field_match: ::protobuf::RepeatedField<FieldMatch>,
    pub action: ::protobuf::SingularPtrField<TableAction>,
    pub priority: i32,
    pub controller_metadata: u64,
    pub is_default_action: bool,
    pub idle_timeout_ns: i64,
    pub metadata: ::std::vec::Vec<u8>,
    pub is_const: bool,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a TableEntry {
    fn default() -> &'a TableEntry {
        <TableEntry as ::protobuf::Message>::default_instance()
    }
}

impl TableEntry {
    pub fn new() -> TableEntry {
        ::std::default::Default::default()
    }

    // uint32 table_id = 1;


    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }
    pub fn clear_table_id(&mut self) {
        self.table_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_table_id(&mut self, v: u32) {
        self.table_id = v;
    }

    // repeated .p4.v1.FieldMatch match = 2;


    pub fn get_field_match(&self) -> &[FieldMatch] {
        &self.field_match
    }
    pub fn clear_field_match(&mut self) {
        self.field_match.clear();
    }

    // Param is passed by value, moved
    pub fn set_field_match(&mut self, v: ::protobuf::RepeatedField<FieldMatch>) {
        self.field_match = v;
    }

    // Mutable pointer to the field.
    pub fn mut_field_match(&mut self) -> &mut ::protobuf::RepeatedField<FieldMatch> {
        &mut self.field_match
    }

    // Take field
    pub fn take_field_match(&mut self) -> ::protobuf::RepeatedField<FieldMatch> {
        ::std::mem::replace(&mut self.field_match, ::protobuf::RepeatedField::new())
    }

    // .p4.v1.TableAction action = 3;


    pub fn get_action(&self) -> &TableAction {
        self.action.as_ref().unwrap_or_else(|| <TableAction as ::protobuf::Message>::default_instance())
    }
    pub fn clear_action(&mut self) {
        self.action.clear();
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    // Param is passed by value, moved
    pub fn set_action(&mut self, v: TableAction) {
        self.action = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_action(&mut self) -> &mut TableAction {
        if self.action.is_none() {
            self.action.set_default();
        }
        self.action.as_mut().unwrap()
    }

    // Take field
    pub fn take_action(&mut self) -> TableAction {
        self.action.take().unwrap_or_else(|| TableAction::new())
    }

    // int32 priority = 4;


    pub fn get_priority(&self) -> i32 {
        self.priority
    }
    pub fn clear_priority(&mut self) {
        self.priority = 0;
    }

    // Param is passed by value, moved
    pub fn set_priority(&mut self, v: i32) {
        self.priority = v;
    }

    // uint64 controller_metadata = 5;


    pub fn get_controller_metadata(&self) -> u64 {
        self.controller_metadata
    }
    pub fn clear_controller_metadata(&mut self) {
        self.controller_metadata = 0;
    }

    // Param is passed by value, moved
    pub fn set_controller_metadata(&mut self, v: u64) {
        self.controller_metadata = v;
    }

    // bool is_default_action = 8;


    pub fn get_is_default_action(&self) -> bool {
        self.is_default_action
    }
    pub fn clear_is_default_action(&mut self) {
        self.is_default_action = false;
    }

    // Param is passed by value, moved
    pub fn set_is_default_action(&mut self, v: bool) {
        self.is_default_action = v;
    }

    // int64 idle_timeout_ns = 9;


    pub fn get_idle_timeout_ns(&self) -> i64 {
        self.idle_timeout_ns
    }
    pub fn clear_idle_timeout_ns(&mut self) {
        self.idle_timeout_ns = 0;
    }

    // Param is passed by value, moved
    pub fn set_idle_timeout_ns(&mut self, v: i64) {
        self.idle_timeout_ns = v;
    }

    // bytes metadata = 11;


    pub fn get_metadata(&self) -> &[u8] {
        &self.metadata
    }
    pub fn clear_metadata(&mut self) {
        self.metadata.clear();
    }

    // Param is passed by value, moved
    pub fn set_metadata(&mut self, v: ::std::vec::Vec<u8>) {
        self.metadata = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_metadata(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.metadata
    }

    // Take field
    pub fn take_metadata(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.metadata, ::std::vec::Vec::new())
    }

    // bool is_const = 13;


    pub fn get_is_const(&self) -> bool {
        self.is_const
    }
    pub fn clear_is_const(&mut self) {
        self.is_const = false;
    }

    // Param is passed by value, moved
    pub fn set_is_const(&mut self, v: bool) {
        self.is_const = v;
    }
}

impl ::protobuf::Message for TableEntry {
    fn is_initialized(&self) -> bool {
        for v in &self.field_match {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.action {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint32()?;
                    self.table_id = tmp;
                },
                2 => {
                    ::protobuf::rt::read_repeated_message_into(wire_type, is, &mut self.field_match)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.action)?;
                },
                4 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.priority = tmp;
                },
                5 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.controller_metadata = tmp;
                },
                8 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_bool()?;
                    self.is_default_action = tmp;
                },
                9 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int64()?;
                    self.idle_timeout_ns = tmp;
                },
                11 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.metadata)?;
                },
                13 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_bool()?;
                    self.is_const = tmp;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.table_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.table_id, ::protobuf::wire_format::WireTypeVarint);
        }
        for value in &self.field_match {
            let len = value.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        };
        if let Some(ref v) = self.action.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if self.priority != 0 {
            my_size += ::protobuf::rt::value_size(4, self.priority, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.controller_metadata != 0 {
            my_size += ::protobuf::rt::value_size(5, self.controller_metadata, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.is_default_action != false {
            my_size += 2;
        }
        if self.idle_timeout_ns != 0 {
            my_size += ::protobuf::rt::value_size(9, self.idle_timeout_ns, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.metadata.is_empty() {
            my_size += ::protobuf::rt::bytes_size(11, &self.metadata);
        }
        if self.is_const != false {
            my_size += 2;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.table_id != 0 {
            os.write_uint32(1, self.table_id)?;
        }
        for v in &self.field_match {
            os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        };
        if let Some(ref v) = self.action.as_ref() {
            os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if self.priority != 0 {
            os.write_int32(4, self.priority)?;
        }
        if self.controller_metadata != 0 {
            os.write_uint64(5, self.controller_metadata)?;
        }
        if self.is_default_action != false {
            os.write_bool(8, self.is_default_action)?;
        }
        if self.idle_timeout_ns != 0 {
            os.write_int64(9, self.idle_timeout_ns)?;
        }
        if !self.metadata.is_empty() {
            os.write_bytes(11, &self.metadata)?;
        }
        if self.is_const != false {
            os.write_bool(13, self.is_const)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> TableEntry {
        TableEntry::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint32>(
                "table_id",
                |m: &TableEntry| { &m.table_id },
                |m: &mut TableEntry| { &mut m.table_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_repeated_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<FieldMatch>>(
                "match",
                |m: &TableEntry| { &m.field_match },
                |m: &mut TableEntry| { &mut m.field_match },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<TableAction>>(
                "action",
                |m: &TableEntry| { &m.action },
                |m: &mut TableEntry| { &mut m.action },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "priority",
                |m: &TableEntry| { &m.priority },
                |m: &mut TableEntry| { &mut m.priority },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "controller_metadata",
                |m: &TableEntry| { &m.controller_metadata },
                |m: &mut TableEntry| { &mut m.controller_metadata },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBool>(
                "is_default_action",
                |m: &TableEntry| { &m.is_default_action },
                |m: &mut TableEntry| { &mut m.is_default_action },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt64>(
                "idle_timeout_ns",
                |m: &TableEntry| { &m.idle_timeout_ns },
                |m: &mut TableEntry| { &mut m.idle_timeout_ns },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "metadata",
                |m: &TableEntry| { &m.metadata },
                |m: &mut TableEntry| { &mut m.metadata },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBool>(
                "is_const",
                |m: &TableEntry| { &m.is_const },
                |m: &mut TableEntry| { &mut m.is_const },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<TableEntry>(
                "TableEntry",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static TableEntry {
        static instance: ::protobuf::rt::LazyV2<TableEntry> = ::protobuf::rt::LazyV2::INIT;
        instance.get(TableEntry::new)
    }
}

impl ::protobuf::Clear for TableEntry {
    fn clear(&mut self) {
        self.table_id = 0;
        self.field_match.clear();
        self.action.clear();
        self.priority = 0;
        self.controller_metadata = 0;
        self.is_default_action = false;
        self.idle_timeout_ns = 0;
        self.metadata.clear();
        self.is_const = false;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for TableEntry {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for TableEntry {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch {
    // message fields
    pub field_id: u32,
    // message oneof groups
    pub field_match_type: ::std::option::Option<FieldMatch_oneof_field_match_type>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch {
    fn default() -> &'a FieldMatch {
        <FieldMatch as ::protobuf::Message>::default_instance()
    }
}

#[derive(Clone,PartialEq,Debug)]
pub enum FieldMatch_oneof_field_match_type {
    exact(FieldMatch_Exact),
    ternary(FieldMatch_Ternary),
    lpm(FieldMatch_LPM),
    range(FieldMatch_Range),
    optional(FieldMatch_Optional),
    other(::protobuf::well_known_types::Any),
}

impl FieldMatch {
    pub fn new() -> FieldMatch {
        ::std::default::Default::default()
    }

    // uint32 field_id = 1;


    pub fn get_field_id(&self) -> u32 {
        self.field_id
    }
    pub fn clear_field_id(&mut self) {
        self.field_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_field_id(&mut self, v: u32) {
        self.field_id = v;
    }

    // .p4.v1.FieldMatch.Exact exact = 2;


    pub fn get_exact(&self) -> &FieldMatch_Exact {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(ref v)) => v,
            _ => <FieldMatch_Exact as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_exact(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_exact(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_exact(&mut self, v: FieldMatch_Exact) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(v))
    }

    // Mutable pointer to the field.
    pub fn mut_exact(&mut self) -> &mut FieldMatch_Exact {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(FieldMatch_Exact::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_exact(&mut self) -> FieldMatch_Exact {
        if self.has_exact() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(v)) => v,
                _ => panic!(),
            }
        } else {
            FieldMatch_Exact::new()
        }
    }

    // .p4.v1.FieldMatch.Ternary ternary = 3;


    pub fn get_ternary(&self) -> &FieldMatch_Ternary {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(ref v)) => v,
            _ => <FieldMatch_Ternary as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_ternary(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_ternary(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_ternary(&mut self, v: FieldMatch_Ternary) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(v))
    }

    // Mutable pointer to the field.
    pub fn mut_ternary(&mut self) -> &mut FieldMatch_Ternary {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(FieldMatch_Ternary::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_ternary(&mut self) -> FieldMatch_Ternary {
        if self.has_ternary() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(v)) => v,
                _ => panic!(),
            }
        } else {
            FieldMatch_Ternary::new()
        }
    }

    // .p4.v1.FieldMatch.LPM lpm = 4;


    pub fn get_lpm(&self) -> &FieldMatch_LPM {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(ref v)) => v,
            _ => <FieldMatch_LPM as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_lpm(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_lpm(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_lpm(&mut self, v: FieldMatch_LPM) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(v))
    }

    // Mutable pointer to the field.
    pub fn mut_lpm(&mut self) -> &mut FieldMatch_LPM {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(FieldMatch_LPM::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_lpm(&mut self) -> FieldMatch_LPM {
        if self.has_lpm() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(v)) => v,
                _ => panic!(),
            }
        } else {
            FieldMatch_LPM::new()
        }
    }

    // .p4.v1.FieldMatch.Range range = 6;


    pub fn get_range(&self) -> &FieldMatch_Range {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(ref v)) => v,
            _ => <FieldMatch_Range as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_range(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_range(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_range(&mut self, v: FieldMatch_Range) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(v))
    }

    // Mutable pointer to the field.
    pub fn mut_range(&mut self) -> &mut FieldMatch_Range {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(FieldMatch_Range::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_range(&mut self) -> FieldMatch_Range {
        if self.has_range() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(v)) => v,
                _ => panic!(),
            }
        } else {
            FieldMatch_Range::new()
        }
    }

    // .p4.v1.FieldMatch.Optional optional = 7;


    pub fn get_optional(&self) -> &FieldMatch_Optional {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(ref v)) => v,
            _ => <FieldMatch_Optional as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_optional(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_optional(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_optional(&mut self, v: FieldMatch_Optional) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(v))
    }

    // Mutable pointer to the field.
    pub fn mut_optional(&mut self) -> &mut FieldMatch_Optional {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(FieldMatch_Optional::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_optional(&mut self) -> FieldMatch_Optional {
        if self.has_optional() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(v)) => v,
                _ => panic!(),
            }
        } else {
            FieldMatch_Optional::new()
        }
    }

    // .google.protobuf.Any other = 100;


    pub fn get_other(&self) -> &::protobuf::well_known_types::Any {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(ref v)) => v,
            _ => <::protobuf::well_known_types::Any as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_other(&mut self) {
        self.field_match_type = ::std::option::Option::None;
    }

    pub fn has_other(&self) -> bool {
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_other(&mut self, v: ::protobuf::well_known_types::Any) {
        self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(v))
    }

    // Mutable pointer to the field.
    pub fn mut_other(&mut self) -> &mut ::protobuf::well_known_types::Any {
        if let ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(_)) = self.field_match_type {
        } else {
            self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(::protobuf::well_known_types::Any::new()));
        }
        match self.field_match_type {
            ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_other(&mut self) -> ::protobuf::well_known_types::Any {
        if self.has_other() {
            match self.field_match_type.take() {
                ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(v)) => v,
                _ => panic!(),
            }
        } else {
            ::protobuf::well_known_types::Any::new()
        }
    }
}

impl ::protobuf::Message for FieldMatch {
    fn is_initialized(&self) -> bool {
        if let Some(FieldMatch_oneof_field_match_type::exact(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(FieldMatch_oneof_field_match_type::ternary(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(FieldMatch_oneof_field_match_type::lpm(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(FieldMatch_oneof_field_match_type::range(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(FieldMatch_oneof_field_match_type::optional(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(FieldMatch_oneof_field_match_type::other(ref v)) = self.field_match_type {
            if !v.is_initialized() {
                return false;
            }
        }
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint32()?;
                    self.field_id = tmp;
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::exact(is.read_message()?));
                },
                3 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::ternary(is.read_message()?));
                },
                4 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::lpm(is.read_message()?));
                },
                6 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::range(is.read_message()?));
                },
                7 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::optional(is.read_message()?));
                },
                100 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_match_type = ::std::option::Option::Some(FieldMatch_oneof_field_match_type::other(is.read_message()?));
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.field_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.field_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if let ::std::option::Option::Some(ref v) = self.field_match_type {
            match v {
                &FieldMatch_oneof_field_match_type::exact(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &FieldMatch_oneof_field_match_type::ternary(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &FieldMatch_oneof_field_match_type::lpm(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &FieldMatch_oneof_field_match_type::range(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &FieldMatch_oneof_field_match_type::optional(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &FieldMatch_oneof_field_match_type::other(ref v) => {
                    let len = v.compute_size();
                    my_size += 2 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
            };
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.field_id != 0 {
            os.write_uint32(1, self.field_id)?;
        }
        if let ::std::option::Option::Some(ref v) = self.field_match_type {
            match v {
                &FieldMatch_oneof_field_match_type::exact(ref v) => {
                    os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &FieldMatch_oneof_field_match_type::ternary(ref v) => {
                    os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &FieldMatch_oneof_field_match_type::lpm(ref v) => {
                    os.write_tag(4, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &FieldMatch_oneof_field_match_type::range(ref v) => {
                    os.write_tag(6, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &FieldMatch_oneof_field_match_type::optional(ref v) => {
                    os.write_tag(7, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &FieldMatch_oneof_field_match_type::other(ref v) => {
                    os.write_tag(100, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
            };
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch {
        FieldMatch::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint32>(
                "field_id",
                |m: &FieldMatch| { &m.field_id },
                |m: &mut FieldMatch| { &mut m.field_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, FieldMatch_Exact>(
                "exact",
                FieldMatch::has_exact,
                FieldMatch::get_exact,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, FieldMatch_Ternary>(
                "ternary",
                FieldMatch::has_ternary,
                FieldMatch::get_ternary,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, FieldMatch_LPM>(
                "lpm",
                FieldMatch::has_lpm,
                FieldMatch::get_lpm,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, FieldMatch_Range>(
                "range",
                FieldMatch::has_range,
                FieldMatch::get_range,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, FieldMatch_Optional>(
                "optional",
                FieldMatch::has_optional,
                FieldMatch::get_optional,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, ::protobuf::well_known_types::Any>(
                "other",
                FieldMatch::has_other,
                FieldMatch::get_other,
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch>(
                "FieldMatch",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch {
        static instance: ::protobuf::rt::LazyV2<FieldMatch> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch::new)
    }
}

impl ::protobuf::Clear for FieldMatch {
    fn clear(&mut self) {
        self.field_id = 0;
        self.field_match_type = ::std::option::Option::None;
        self.field_match_type = ::std::option::Option::None;
        self.field_match_type = ::std::option::Option::None;
        self.field_match_type = ::std::option::Option::None;
        self.field_match_type = ::std::option::Option::None;
        self.field_match_type = ::std::option::Option::None;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch_Exact {
    // message fields
    pub value: ::std::vec::Vec<u8>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch_Exact {
    fn default() -> &'a FieldMatch_Exact {
        <FieldMatch_Exact as ::protobuf::Message>::default_instance()
    }
}

impl FieldMatch_Exact {
    pub fn new() -> FieldMatch_Exact {
        ::std::default::Default::default()
    }

    // bytes value = 1;


    pub fn get_value(&self) -> &[u8] {
        &self.value
    }
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    // Param is passed by value, moved
    pub fn set_value(&mut self, v: ::std::vec::Vec<u8>) {
        self.value = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_value(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.value
    }

    // Take field
    pub fn take_value(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.value, ::std::vec::Vec::new())
    }
}

impl ::protobuf::Message for FieldMatch_Exact {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.value)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.value.is_empty() {
            my_size += ::protobuf::rt::bytes_size(1, &self.value);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.value.is_empty() {
            os.write_bytes(1, &self.value)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch_Exact {
        FieldMatch_Exact::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "value",
                |m: &FieldMatch_Exact| { &m.value },
                |m: &mut FieldMatch_Exact| { &mut m.value },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch_Exact>(
                "FieldMatch.Exact",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch_Exact {
        static instance: ::protobuf::rt::LazyV2<FieldMatch_Exact> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch_Exact::new)
    }
}

impl ::protobuf::Clear for FieldMatch_Exact {
    fn clear(&mut self) {
        self.value.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch_Exact {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch_Exact {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch_Ternary {
    // message fields
    pub value: ::std::vec::Vec<u8>,
    pub mask: ::std::vec::Vec<u8>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch_Ternary {
    fn default() -> &'a FieldMatch_Ternary {
        <FieldMatch_Ternary as ::protobuf::Message>::default_instance()
    }
}

impl FieldMatch_Ternary {
    pub fn new() -> FieldMatch_Ternary {
        ::std::default::Default::default()
    }

    // bytes value = 1;


    pub fn get_value(&self) -> &[u8] {
        &self.value
    }
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    // Param is passed by value, moved
    pub fn set_value(&mut self, v: ::std::vec::Vec<u8>) {
        self.value = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_value(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.value
    }

    // Take field
    pub fn take_value(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.value, ::std::vec::Vec::new())
    }

    // bytes mask = 2;


    pub fn get_mask(&self) -> &[u8] {
        &self.mask
    }
    pub fn clear_mask(&mut self) {
        self.mask.clear();
    }

    // Param is passed by value, moved
    pub fn set_mask(&mut self, v: ::std::vec::Vec<u8>) {
        self.mask = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_mask(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.mask
    }

    // Take field
    pub fn take_mask(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.mask, ::std::vec::Vec::new())
    }
}

impl ::protobuf::Message for FieldMatch_Ternary {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.value)?;
                },
                2 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.mask)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.value.is_empty() {
            my_size += ::protobuf::rt::bytes_size(1, &self.value);
        }
        if !self.mask.is_empty() {
            my_size += ::protobuf::rt::bytes_size(2, &self.mask);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.value.is_empty() {
            os.write_bytes(1, &self.value)?;
        }
        if !self.mask.is_empty() {
            os.write_bytes(2, &self.mask)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch_Ternary {
        FieldMatch_Ternary::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "value",
                |m: &FieldMatch_Ternary| { &m.value },
                |m: &mut FieldMatch_Ternary| { &mut m.value },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "mask",
                |m: &FieldMatch_Ternary| { &m.mask },
                |m: &mut FieldMatch_Ternary| { &mut m.mask },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch_Ternary>(
                "FieldMatch.Ternary",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch_Ternary {
        static instance: ::protobuf::rt::LazyV2<FieldMatch_Ternary> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch_Ternary::new)
    }
}

impl ::protobuf::Clear for FieldMatch_Ternary {
    fn clear(&mut self) {
        self.value.clear();
        self.mask.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch_Ternary {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch_Ternary {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch_LPM {
    // message fields
    pub value: ::std::vec::Vec<u8>,
    pub prefix_len: i32,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch_LPM {
    fn default() -> &'a FieldMatch_LPM {
        <FieldMatch_LPM as ::protobuf::Message>::default_instance()
    }
}

impl FieldMatch_LPM {
    pub fn new() -> FieldMatch_LPM {
        ::std::default::Default::default()
    }

    // bytes value = 1;


    pub fn get_value(&self) -> &[u8] {
        &self.value
    }
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    // Param is passed by value, moved
    pub fn set_value(&mut self, v: ::std::vec::Vec<u8>) {
        self.value = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_value(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.value
    }

    // Take field
    pub fn take_value(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.value, ::std::vec::Vec::new())
    }

    // int32 prefix_len = 2;


    pub fn get_prefix_len(&self) -> i32 {
        self.prefix_len
    }
    pub fn clear_prefix_len(&mut self) {
        self.prefix_len = 0;
    }

    // Param is passed by value, moved
    pub fn set_prefix_len(&mut self, v: i32) {
        self.prefix_len = v;
    }
}

impl ::protobuf::Message for FieldMatch_LPM {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.value)?;
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.prefix_len = tmp;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.value.is_empty() {
            my_size += ::protobuf::rt::bytes_size(1, &self.value);
        }
        if self.prefix_len != 0 {
            my_size += ::protobuf::rt::value_size(2, self.prefix_len, ::protobuf::wire_format::WireTypeVarint);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.value.is_empty() {
            os.write_bytes(1, &self.value)?;
        }
        if self.prefix_len != 0 {
            os.write_int32(2, self.prefix_len)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch_LPM {
        FieldMatch_LPM::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "value",
                |m: &FieldMatch_LPM| { &m.value },
                |m: &mut FieldMatch_LPM| { &mut m.value },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "prefix_len",
                |m: &FieldMatch_LPM| { &m.prefix_len },
                |m: &mut FieldMatch_LPM| { &mut m.prefix_len },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch_LPM>(
                "FieldMatch.LPM",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch_LPM {
        static instance: ::protobuf::rt::LazyV2<FieldMatch_LPM> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch_LPM::new)
    }
}

impl ::protobuf::Clear for FieldMatch_LPM {
    fn clear(&mut self) {
        self.value.clear();
        self.prefix_len = 0;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch_LPM {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch_LPM {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch_Range {
    // message fields
    pub low: ::std::vec::Vec<u8>,
    pub high: ::std::vec::Vec<u8>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch_Range {
    fn default() -> &'a FieldMatch_Range {
        <FieldMatch_Range as ::protobuf::Message>::default_instance()
    }
}

impl FieldMatch_Range {
    pub fn new() -> FieldMatch_Range {
        ::std::default::Default::default()
    }

    // bytes low = 1;


    pub fn get_low(&self) -> &[u8] {
        &self.low
    }
    pub fn clear_low(&mut self) {
        self.low.clear();
    }

    // Param is passed by value, moved
    pub fn set_low(&mut self, v: ::std::vec::Vec<u8>) {
        self.low = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_low(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.low
    }

    // Take field
    pub fn take_low(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.low, ::std::vec::Vec::new())
    }

    // bytes high = 2;


    pub fn get_high(&self) -> &[u8] {
        &self.high
    }
    pub fn clear_high(&mut self) {
        self.high.clear();
    }

    // Param is passed by value, moved
    pub fn set_high(&mut self, v: ::std::vec::Vec<u8>) {
        self.high = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_high(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.high
    }

    // Take field
    pub fn take_high(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.high, ::std::vec::Vec::new())
    }
}

impl ::protobuf::Message for FieldMatch_Range {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.low)?;
                },
                2 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.high)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.low.is_empty() {
            my_size += ::protobuf::rt::bytes_size(1, &self.low);
        }
        if !self.high.is_empty() {
            my_size += ::protobuf::rt::bytes_size(2, &self.high);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.low.is_empty() {
            os.write_bytes(1, &self.low)?;
        }
        if !self.high.is_empty() {
            os.write_bytes(2, &self.high)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch_Range {
        FieldMatch_Range::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "low",
                |m: &FieldMatch_Range| { &m.low },
                |m: &mut FieldMatch_Range| { &mut m.low },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "high",
                |m: &FieldMatch_Range| { &m.high },
                |m: &mut FieldMatch_Range| { &mut m.high },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch_Range>(
                "FieldMatch.Range",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch_Range {
        static instance: ::protobuf::rt::LazyV2<FieldMatch_Range> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch_Range::new)
    }
}

impl ::protobuf::Clear for FieldMatch_Range {
    fn clear(&mut self) {
        self.low.clear();
        self.high.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch_Range {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch_Range {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct FieldMatch_Optional {
    // message fields
    pub value: ::std::vec::Vec<u8>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a FieldMatch_Optional {
    fn default() -> &'a FieldMatch_Optional {
        <FieldMatch_Optional as ::protobuf::Message>::default_instance()
    }
}

impl FieldMatch_Optional {
    pub fn new() -> FieldMatch_Optional {
        ::std::default::Default::default()
    }

    // bytes value = 1;


    pub fn get_value(&self) -> &[u8] {
        &self.value
    }
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    // Param is passed by value, moved
    pub fn set_value(&mut self, v: ::std::vec::Vec<u8>) {
        self.value = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_value(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.value
    }

    // Take field
    pub fn take_value(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.value, ::std::vec::Vec::new())
    }
}

impl ::protobuf::Message for FieldMatch_Optional {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.value)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.value.is_empty() {
            my_size += ::protobuf::rt::bytes_size(1, &self.value);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.value.is_empty() {
            os.write_bytes(1, &self.value)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> FieldMatch_Optional {
        FieldMatch_Optional::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "value",
                |m: &FieldMatch_Optional| { &m.value },
                |m: &mut FieldMatch_Optional| { &mut m.value },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<FieldMatch_Optional>(
                "FieldMatch.Optional",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static FieldMatch_Optional {
        static instance: ::protobuf::rt::LazyV2<FieldMatch_Optional> = ::protobuf::rt::LazyV2::INIT;
        instance.get(FieldMatch_Optional::new)
    }
}

impl ::protobuf::Clear for FieldMatch_Optional {
    fn clear(&mut self) {
        self.value.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for FieldMatch_Optional {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for FieldMatch_Optional {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct TableAction {
    // message oneof groups
    pub field_type: ::std::option::Option<TableAction_oneof_type>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a TableAction {
    fn default() -> &'a TableAction {
        <TableAction as ::protobuf::Message>::default_instance()
    }
}

#[derive(Clone,PartialEq,Debug)]
pub enum TableAction_oneof_type {
    action(Action),
    action_profile_member_id(u32),
    action_profile_group_id(u32),
}

impl TableAction {
    pub fn new() -> TableAction {
        ::std::default::Default::default()
    }

    // .p4.v1.Action action = 1;


    pub fn get_action(&self) -> &Action {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action(ref v)) => v,
            _ => <Action as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_action(&mut self) {
        self.field_type = ::std::option::Option::None;
    }

    pub fn has_action(&self) -> bool {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_action(&mut self, v: Action) {
        self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action(v))
    }

    // Mutable pointer to the field.
    pub fn mut_action(&mut self) -> &mut Action {
        if let ::std::option::Option::Some(TableAction_oneof_type::action(_)) = self.field_type {
        } else {
            self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action(Action::new()));
        }
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_action(&mut self) -> Action {
        if self.has_action() {
            match self.field_type.take() {
                ::std::option::Option::Some(TableAction_oneof_type::action(v)) => v,
                _ => panic!(),
            }
        } else {
            Action::new()
        }
    }

    // uint32 action_profile_member_id = 2;


    pub fn get_action_profile_member_id(&self) -> u32 {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action_profile_member_id(v)) => v,
            _ => 0,
        }
    }
    pub fn clear_action_profile_member_id(&mut self) {
        self.field_type = ::std::option::Option::None;
    }

    pub fn has_action_profile_member_id(&self) -> bool {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action_profile_member_id(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_action_profile_member_id(&mut self, v: u32) {
        self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action_profile_member_id(v))
    }

    // uint32 action_profile_group_id = 3;


    pub fn get_action_profile_group_id(&self) -> u32 {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action_profile_group_id(v)) => v,
            _ => 0,
        }
    }
    pub fn clear_action_profile_group_id(&mut self) {
        self.field_type = ::std::option::Option::None;
    }

    pub fn has_action_profile_group_id(&self) -> bool {
        match self.field_type {
            ::std::option::Option::Some(TableAction_oneof_type::action_profile_group_id(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_action_profile_group_id(&mut self, v: u32) {
        self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action_profile_group_id(v))
    }
}

impl ::protobuf::Message for TableAction {
    fn is_initialized(&self) -> bool {
        if let Some(TableAction_oneof_type::action(ref v)) = self.field_type {
            if !v.is_initialized() {
                return false;
            }
        }
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action(is.read_message()?));
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action_profile_member_id(is.read_uint32()?));
                },
                3 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.field_type = ::std::option::Option::Some(TableAction_oneof_type::action_profile_group_id(is.read_uint32()?));
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let ::std::option::Option::Some(ref v) = self.field_type {
            match v {
                &TableAction_oneof_type::action(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &TableAction_oneof_type::action_profile_member_id(v) => {
                    my_size += ::protobuf::rt::value_size(2, v, ::protobuf::wire_format::WireTypeVarint);
                },
                &TableAction_oneof_type::action_profile_group_id(v) => {
                    my_size += ::protobuf::rt::value_size(3, v, ::protobuf::wire_format::WireTypeVarint);
                },
            };
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let ::std::option::Option::Some(ref v) = self.field_type {
            match v {
                &TableAction_oneof_type::action(ref v) => {
                    os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &TableAction_oneof_type::action_profile_member_id(v) => {
                    os.write_uint32(2, v)?;
                },
                &TableAction_oneof_type::action_profile_group_id(v) => {
                    os.write_uint32(3, v)?;
                },
            };
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> TableAction {
        TableAction::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, Action>(
                "action",
                TableAction::has_action,
                TableAction::get_action,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_u32_accessor::<_>(
                "action_profile_member_id",
                TableAction::has_action_profile_member_id,
                TableAction::get_action_profile_member_id,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_u32_accessor::<_>(
                "action_profile_group_id",
                TableAction::has_action_profile_group_id,
                TableAction::get_action_profile_group_id,
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<TableAction>(
                "TableAction",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static TableAction {
        static instance: ::protobuf::rt::LazyV2<TableAction> = ::protobuf::rt::LazyV2::INIT;
        instance.get(TableAction::new)
    }
}

impl ::protobuf::Clear for TableAction {
    fn clear(&mut self) {
        self.field_type = ::std::option::Option::None;
        self.field_type = ::std::option::Option::None;
        self.field_type = ::std::option::Option::None;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for TableAction {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for TableAction {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Action {
    // message fields
    pub action_id: u32,
    pub params: ::protobuf::RepeatedField<Action_Param>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Action {
    fn default() -> &'a Action {
        <Action as ::protobuf::Message>::default_instance()
    }
}

impl Action {
    pub fn new() -> Action {
        ::std::default::Default::default()
    }

    // uint32 action_id = 1;


    pub fn get_action_id(&self) -> u32 {
        self.action_id
    }
    pub fn clear_action_id(&mut self) {
        self.action_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_action_id(&mut self, v: u32) {
        self.action_id = v;
    }

    // repeated .p4.v1.Action.Param params = 4;


    pub fn get_params(&self) -> &[Action_Param] {
        &self.params
    }
    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    // Param is passed by value, moved
    pub fn set_params(&mut self, v: ::protobuf::RepeatedField<Action_Param>) {
        self.params = v;
    }

    // Mutable pointer to the field.
    pub fn mut_params(&mut self) -> &mut ::protobuf::RepeatedField<Action_Param> {
        &mut self.params
    }

    // Take field
    pub fn take_params(&mut self) -> ::protobuf::RepeatedField<Action_Param> {
        ::std::mem::replace(&mut self.params, ::protobuf::RepeatedField::new())
    }
}

impl ::protobuf::Message for Action {
    fn is_initialized(&self) -> bool {
        for v in &self.params {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint32()?;
                    self.action_id = tmp;
                },
                4 => {
                    ::protobuf::rt::read_repeated_message_into(wire_type, is, &mut self.params)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.action_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.action_id, ::protobuf::wire_format::WireTypeVarint);
        }
        for value in &self.params {
            let len = value.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        };
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.action_id != 0 {
            os.write_uint32(1, self.action_id)?;
        }
        for v in &self.params {
            os.write_tag(4, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        };
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Action {
        Action::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint32>(
                "action_id",
                |m: &Action| { &m.action_id },
                |m: &mut Action| { &mut m.action_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_repeated_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Action_Param>>(
                "params",
                |m: &Action| { &m.params },
                |m: &mut Action| { &mut m.params },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Action>(
                "Action",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Action {
        static instance: ::protobuf::rt::LazyV2<Action> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Action::new)
    }
}

impl ::protobuf::Clear for Action {
    fn clear(&mut self) {
        self.action_id = 0;
        self.params.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Action {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Action {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Action_Param {
    // message fields
    pub param_id: u32,
    pub value: ::std::vec::Vec<u8>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Action_Param {
    fn default() -> &'a Action_Param {
        <Action_Param as ::protobuf::Message>::default_instance()
    }
}

impl Action_Param {
    pub fn new() -> Action_Param {
        ::std::default::Default::default()
    }

    // uint32 param_id = 2;


    pub fn get_param_id(&self) -> u32 {
        self.param_id
    }
    pub fn clear_param_id(&mut self) {
        self.param_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_param_id(&mut self, v: u32) {
        self.param_id = v;
    }

    // bytes value = 3;


    pub fn get_value(&self) -> &[u8] {
        &self.value
    }
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    // Param is passed by value, moved
    pub fn set_value(&mut self, v: ::std::vec::Vec<u8>) {
        self.value = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_value(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.value
    }

    // Take field
    pub fn take_value(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.value, ::std::vec::Vec::new())
    }
}

impl ::protobuf::Message for Action_Param {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint32()?;
                    self.param_id = tmp;
                },
                3 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.value)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.param_id != 0 {
            my_size += ::protobuf::rt::value_size(2, self.param_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.value.is_empty() {
            my_size += ::protobuf::rt::bytes_size(3, &self.value);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.param_id != 0 {
            os.write_uint32(2, self.param_id)?;
        }
        if !self.value.is_empty() {
            os.write_bytes(3, &self.value)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Action_Param {
        Action_Param::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint32>(
                "param_id",
                |m: &Action_Param| { &m.param_id },
                |m: &mut Action_Param| { &mut m.param_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "value",
                |m: &Action_Param| { &m.value },
                |m: &mut Action_Param| { &mut m.value },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Action_Param>(
                "Action.Param",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Action_Param {
        static instance: ::protobuf::rt::LazyV2<Action_Param> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Action_Param::new)
    }
}

impl ::protobuf::Clear for Action_Param {
    fn clear(&mut self) {
        self.param_id = 0;
        self.value.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Action_Param {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Action_Param {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct StreamMessageRequest {
    // message oneof groups
    pub update: ::std::option::Option<StreamMessageRequest_oneof_update>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a StreamMessageRequest {
    fn default() -> &'a StreamMessageRequest {
        <StreamMessageRequest as ::protobuf::Message>::default_instance()
    }
}

#[derive(Clone,PartialEq,Debug)]
pub enum StreamMessageRequest_oneof_update {
    arbitration(MasterArbitrationUpdate),
    other(::protobuf::well_known_types::Any),
}

impl StreamMessageRequest {
    pub fn new() -> StreamMessageRequest {
        ::std::default::Default::default()
    }

    // .p4.v1.MasterArbitrationUpdate arbitration = 1;


    pub fn get_arbitration(&self) -> &MasterArbitrationUpdate {
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(ref v)) => v,
            _ => <MasterArbitrationUpdate as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_arbitration(&mut self) {
        self.update = ::std::option::Option::None;
    }

    pub fn has_arbitration(&self) -> bool {
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_arbitration(&mut self, v: MasterArbitrationUpdate) {
        self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(v))
    }

    // Mutable pointer to the field.
    pub fn mut_arbitration(&mut self) -> &mut MasterArbitrationUpdate {
        if let ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(_)) = self.update {
        } else {
            self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(MasterArbitrationUpdate::new()));
        }
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_arbitration(&mut self) -> MasterArbitrationUpdate {
        if self.has_arbitration() {
            match self.update.take() {
                ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(v)) => v,
                _ => panic!(),
            }
        } else {
            MasterArbitrationUpdate::new()
        }
    }

    // .google.protobuf.Any other = 4;


    pub fn get_other(&self) -> &::protobuf::well_known_types::Any {
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(ref v)) => v,
            _ => <::protobuf::well_known_types::Any as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_other(&mut self) {
        self.update = ::std::option::Option::None;
    }

    pub fn has_other(&self) -> bool {
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_other(&mut self, v: ::protobuf::well_known_types::Any) {
        self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(v))
    }

    // Mutable pointer to the field.
    pub fn mut_other(&mut self) -> &mut ::protobuf::well_known_types::Any {
        if let ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(_)) = self.update {
        } else {
            self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(::protobuf::well_known_types::Any::new()));
        }
        match self.update {
            ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_other(&mut self) -> ::protobuf::well_known_types::Any {
        if self.has_other() {
            match self.update.take() {
                ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(v)) => v,
                _ => panic!(),
            }
        } else {
            ::protobuf::well_known_types::Any::new()
        }
    }
}

impl ::protobuf::Message for StreamMessageRequest {
    fn is_initialized(&self) -> bool {
        if let Some(StreamMessageRequest_oneof_update::arbitration(ref v)) = self.update {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(StreamMessageRequest_oneof_update::other(ref v)) = self.update {
            if !v.is_initialized() {
                return false;
            }
        }
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::arbitration(is.read_message()?));
                },
                4 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.update = ::std::option::Option::Some(StreamMessageRequest_oneof_update::other(is.read_message()?));
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let ::std::option::Option::Some(ref v) = self.update {
            match v {
                &StreamMessageRequest_oneof_update::arbitration(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &StreamMessageRequest_oneof_update::other(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
            };
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let ::std::option::Option::Some(ref v) = self.update {
            match v {
                &StreamMessageRequest_oneof_update::arbitration(ref v) => {
                    os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &StreamMessageRequest_oneof_update::other(ref v) => {
                    os.write_tag(4, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
            };
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> StreamMessageRequest {
        StreamMessageRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, MasterArbitrationUpdate>(
                "arbitration",
                StreamMessageRequest::has_arbitration,
                StreamMessageRequest::get_arbitration,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, ::protobuf::well_known_types::Any>(
                "other",
                StreamMessageRequest::has_other,
                StreamMessageRequest::get_other,
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<StreamMessageRequest>(
                "StreamMessageRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static StreamMessageRequest {
        static instance: ::protobuf::rt::LazyV2<StreamMessageRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(StreamMessageRequest::new)
    }
}

impl ::protobuf::Clear for StreamMessageRequest {
    fn clear(&mut self) {
        self.update = ::std::option::Option::None;
        self.update = ::std::option::Option::None;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for StreamMessageRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for StreamMessageRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct StreamMessageResponse {
    // message oneof groups
    pub update: ::std::option::Option<StreamMessageResponse_oneof_update>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a StreamMessageResponse {
    fn default() -> &'a StreamMessageResponse {
        <StreamMessageResponse as ::protobuf::Message>::default_instance()
    }
}

#[derive(Clone,PartialEq,Debug)]
pub enum StreamMessageResponse_oneof_update {
    arbitration(MasterArbitrationUpdate),
    other(::protobuf::well_known_types::Any),
    error(StreamError),
}

impl StreamMessageResponse {
    pub fn new() -> StreamMessageResponse {
        ::std::default::Default::default()
    }

    // .p4.v1.MasterArbitrationUpdate arbitration = 1;


    pub fn get_arbitration(&self) -> &MasterArbitrationUpdate {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(ref v)) => v,
            _ => <MasterArbitrationUpdate as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_arbitration(&mut self) {
        self.update = ::std::option::Option::None;
    }

    pub fn has_arbitration(&self) -> bool {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_arbitration(&mut self, v: MasterArbitrationUpdate) {
        self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(v))
    }

    // Mutable pointer to the field.
    pub fn mut_arbitration(&mut self) -> &mut MasterArbitrationUpdate {
        if let ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(_)) = self.update {
        } else {
            self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(MasterArbitrationUpdate::new()));
        }
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_arbitration(&mut self) -> MasterArbitrationUpdate {
        if self.has_arbitration() {
            match self.update.take() {
                ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(v)) => v,
                _ => panic!(),
            }
        } else {
            MasterArbitrationUpdate::new()
        }
    }

    // .google.protobuf.Any other = 5;


    pub fn get_other(&self) -> &::protobuf::well_known_types::Any {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(ref v)) => v,
            _ => <::protobuf::well_known_types::Any as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_other(&mut self) {
        self.update = ::std::option::Option::None;
    }

    pub fn has_other(&self) -> bool {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_other(&mut self, v: ::protobuf::well_known_types::Any) {
        self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(v))
    }

    // Mutable pointer to the field.
    pub fn mut_other(&mut self) -> &mut ::protobuf::well_known_types::Any {
        if let ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(_)) = self.update {
        } else {
            self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(::protobuf::well_known_types::Any::new()));
        }
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_other(&mut self) -> ::protobuf::well_known_types::Any {
        if self.has_other() {
            match self.update.take() {
                ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(v)) => v,
                _ => panic!(),
            }
        } else {
            ::protobuf::well_known_types::Any::new()
        }
    }

    // .p4.v1.StreamError error = 6;


    pub fn get_error(&self) -> &StreamError {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(ref v)) => v,
            _ => <StreamError as ::protobuf::Message>::default_instance(),
        }
    }
    pub fn clear_error(&mut self) {
        self.update = ::std::option::Option::None;
    }

    pub fn has_error(&self) -> bool {
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(..)) => true,
            _ => false,
        }
    }

    // Param is passed by value, moved
    pub fn set_error(&mut self, v: StreamError) {
        self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(v))
    }

    // Mutable pointer to the field.
    pub fn mut_error(&mut self) -> &mut StreamError {
        if let ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(_)) = self.update {
        } else {
            self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(StreamError::new()));
        }
        match self.update {
            ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(ref mut v)) => v,
            _ => panic!(),
        }
    }

    // Take field
    pub fn take_error(&mut self) -> StreamError {
        if self.has_error() {
            match self.update.take() {
                ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(v)) => v,
                _ => panic!(),
            }
        } else {
            StreamError::new()
        }
    }
}

impl ::protobuf::Message for StreamMessageResponse {
    fn is_initialized(&self) -> bool {
        if let Some(StreamMessageResponse_oneof_update::arbitration(ref v)) = self.update {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(StreamMessageResponse_oneof_update::other(ref v)) = self.update {
            if !v.is_initialized() {
                return false;
            }
        }
        if let Some(StreamMessageResponse_oneof_update::error(ref v)) = self.update {
            if !v.is_initialized() {
                return false;
            }
        }
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::arbitration(is.read_message()?));
                },
                5 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::other(is.read_message()?));
                },
                6 => {
                    if wire_type != ::protobuf::wire_format::WireTypeLengthDelimited {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    self.update = ::std::option::Option::Some(StreamMessageResponse_oneof_update::error(is.read_message()?));
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let ::std::option::Option::Some(ref v) = self.update {
            match v {
                &StreamMessageResponse_oneof_update::arbitration(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &StreamMessageResponse_oneof_update::other(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
                &StreamMessageResponse_oneof_update::error(ref v) => {
                    let len = v.compute_size();
                    my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
                },
            };
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let ::std::option::Option::Some(ref v) = self.update {
            match v {
                &StreamMessageResponse_oneof_update::arbitration(ref v) => {
                    os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &StreamMessageResponse_oneof_update::other(ref v) => {
                    os.write_tag(5, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
                &StreamMessageResponse_oneof_update::error(ref v) => {
                    os.write_tag(6, ::protobuf::wire_format::WireTypeLengthDelimited)?;
                    os.write_raw_varint32(v.get_cached_size())?;
                    v.write_to_with_cached_sizes(os)?;
                },
            };
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> StreamMessageResponse {
        StreamMessageResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, MasterArbitrationUpdate>(
                "arbitration",
                StreamMessageResponse::has_arbitration,
                StreamMessageResponse::get_arbitration,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, ::protobuf::well_known_types::Any>(
                "other",
                StreamMessageResponse::has_other,
                StreamMessageResponse::get_other,
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_message_accessor::<_, StreamError>(
                "error",
                StreamMessageResponse::has_error,
                StreamMessageResponse::get_error,
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<StreamMessageResponse>(
                "StreamMessageResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static StreamMessageResponse {
        static instance: ::protobuf::rt::LazyV2<StreamMessageResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(StreamMessageResponse::new)
    }
}

impl ::protobuf::Clear for StreamMessageResponse {
    fn clear(&mut self) {
        self.update = ::std::option::Option::None;
        self.update = ::std::option::Option::None;
        self.update = ::std::option::Option::None;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for StreamMessageResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for StreamMessageResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct StreamError {
    // message fields
    pub canonical_code: i32,
    pub message: ::std::string::String,
    pub space: ::std::string::String,
    pub code: i32,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a StreamError {
    fn default() -> &'a StreamError {
        <StreamError as ::protobuf::Message>::default_instance()
    }
}

impl StreamError {
    pub fn new() -> StreamError {
        ::std::default::Default::default()
    }

    // int32 canonical_code = 1;


    pub fn get_canonical_code(&self) -> i32 {
        self.canonical_code
    }
    pub fn clear_canonical_code(&mut self) {
        self.canonical_code = 0;
    }

    // Param is passed by value, moved
    pub fn set_canonical_code(&mut self, v: i32) {
        self.canonical_code = v;
    }

    // string message = 2;


    pub fn get_message(&self) -> &str {
        &self.message
    }
    pub fn clear_message(&mut self) {
        self.message.clear();
    }

    // Param is passed by value, moved
    pub fn set_message(&mut self, v: ::std::string::String) {
        self.message = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_message(&mut self) -> &mut ::std::string::String {
        &mut self.message
    }

    // Take field
    pub fn take_message(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.message, ::std::string::String::new())
    }

    // string space = 3;


    pub fn get_space(&self) -> &str {
        &self.space
    }
    pub fn clear_space(&mut self) {
        self.space.clear();
    }

    // Param is passed by value, moved
    pub fn set_space(&mut self, v: ::std::string::String) {
        self.space = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_space(&mut self) -> &mut ::std::string::String {
        &mut self.space
    }

    // Take field
    pub fn take_space(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.space, ::std::string::String::new())
    }

    // int32 code = 4;


    pub fn get_code(&self) -> i32 {
        self.code
    }
    pub fn clear_code(&mut self) {
        self.code = 0;
    }

    // Param is passed by value, moved
    pub fn set_code(&mut self, v: i32) {
        self.code = v;
    }
}

impl ::protobuf::Message for StreamError {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.canonical_code = tmp;
                },
                2 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.message)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.space)?;
                },
                4 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.code = tmp;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.canonical_code != 0 {
            my_size += ::protobuf::rt::value_size(1, self.canonical_code, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.message.is_empty() {
            my_size += ::protobuf::rt::string_size(2, &self.message);
        }
        if !self.space.is_empty() {
            my_size += ::protobuf::rt::string_size(3, &self.space);
        }
        if self.code != 0 {
            my_size += ::protobuf::rt::value_size(4, self.code, ::protobuf::wire_format::WireTypeVarint);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.canonical_code != 0 {
            os.write_int32(1, self.canonical_code)?;
        }
        if !self.message.is_empty() {
            os.write_string(2, &self.message)?;
        }
        if !self.space.is_empty() {
            os.write_string(3, &self.space)?;
        }
        if self.code != 0 {
            os.write_int32(4, self.code)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> StreamError {
        StreamError::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "canonical_code",
                |m: &StreamError| { &m.canonical_code },
                |m: &mut StreamError| { &mut m.canonical_code },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "message",
                |m: &StreamError| { &m.message },
                |m: &mut StreamError| { &mut m.message },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "space",
                |m: &StreamError| { &m.space },
                |m: &mut StreamError| { &mut m.space },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "code",
                |m: &StreamError| { &m.code },
                |m: &mut StreamError| { &mut m.code },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<StreamError>(
                "StreamError",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static StreamError {
        static instance: ::protobuf::rt::LazyV2<StreamError> = ::protobuf::rt::LazyV2::INIT;
        instance.get(StreamError::new)
    }
}

impl ::protobuf::Clear for StreamError {
    fn clear(&mut self) {
        self.canonical_code = 0;
        self.message.clear();
        self.space.clear();
        self.code = 0;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for StreamError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for StreamError {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct MasterArbitrationUpdate {
    // message fields
    pub device_id: u64,
    pub role: ::protobuf::SingularPtrField<Role>,
    pub election_id: ::protobuf::SingularPtrField<Uint128>,
    pub status: ::protobuf::SingularPtrField<super::status::Status>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a MasterArbitrationUpdate {
    fn default() -> &'a MasterArbitrationUpdate {
        <MasterArbitrationUpdate as ::protobuf::Message>::default_instance()
    }
}

impl MasterArbitrationUpdate {
    pub fn new() -> MasterArbitrationUpdate {
        ::std::default::Default::default()
    }

    // uint64 device_id = 1;


    pub fn get_device_id(&self) -> u64 {
        self.device_id
    }
    pub fn clear_device_id(&mut self) {
        self.device_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_device_id(&mut self, v: u64) {
        self.device_id = v;
    }

    // .p4.v1.Role role = 2;


    pub fn get_role(&self) -> &Role {
        self.role.as_ref().unwrap_or_else(|| <Role as ::protobuf::Message>::default_instance())
    }
    pub fn clear_role(&mut self) {
        self.role.clear();
    }

    pub fn has_role(&self) -> bool {
        self.role.is_some()
    }

    // Param is passed by value, moved
    pub fn set_role(&mut self, v: Role) {
        self.role = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_role(&mut self) -> &mut Role {
        if self.role.is_none() {
            self.role.set_default();
        }
        self.role.as_mut().unwrap()
    }

    // Take field
    pub fn take_role(&mut self) -> Role {
        self.role.take().unwrap_or_else(|| Role::new())
    }

    // .p4.v1.Uint128 election_id = 3;


    pub fn get_election_id(&self) -> &Uint128 {
        self.election_id.as_ref().unwrap_or_else(|| <Uint128 as ::protobuf::Message>::default_instance())
    }
    pub fn clear_election_id(&mut self) {
        self.election_id.clear();
    }

    pub fn has_election_id(&self) -> bool {
        self.election_id.is_some()
    }

    // Param is passed by value, moved
    pub fn set_election_id(&mut self, v: Uint128) {
        self.election_id = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_election_id(&mut self) -> &mut Uint128 {
        if self.election_id.is_none() {
            self.election_id.set_default();
        }
        self.election_id.as_mut().unwrap()
    }

    // Take field
    pub fn take_election_id(&mut self) -> Uint128 {
        self.election_id.take().unwrap_or_else(|| Uint128::new())
    }

    // .google.rpc.Status status = 4;


    pub fn get_status(&self) -> &super::status::Status {
        self.status.as_ref().unwrap_or_else(|| <super::status::Status as ::protobuf::Message>::default_instance())
    }
    pub fn clear_status(&mut self) {
        self.status.clear();
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    // Param is passed by value, moved
    pub fn set_status(&mut self, v: super::status::Status) {
        self.status = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_status(&mut self) -> &mut super::status::Status {
        if self.status.is_none() {
            self.status.set_default();
        }
        self.status.as_mut().unwrap()
    }

    // Take field
    pub fn take_status(&mut self) -> super::status::Status {
        self.status.take().unwrap_or_else(|| super::status::Status::new())
    }
}

impl ::protobuf::Message for MasterArbitrationUpdate {
    fn is_initialized(&self) -> bool {
        for v in &self.role {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.election_id {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.status {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.device_id = tmp;
                },
                2 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.role)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.election_id)?;
                },
                4 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.status)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.device_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.device_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if let Some(ref v) = self.role.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if let Some(ref v) = self.election_id.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if let Some(ref v) = self.status.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.device_id != 0 {
            os.write_uint64(1, self.device_id)?;
        }
        if let Some(ref v) = self.role.as_ref() {
            os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if let Some(ref v) = self.election_id.as_ref() {
            os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if let Some(ref v) = self.status.as_ref() {
            os.write_tag(4, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> MasterArbitrationUpdate {
        MasterArbitrationUpdate::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "device_id",
                |m: &MasterArbitrationUpdate| { &m.device_id },
                |m: &mut MasterArbitrationUpdate| { &mut m.device_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Role>>(
                "role",
                |m: &MasterArbitrationUpdate| { &m.role },
                |m: &mut MasterArbitrationUpdate| { &mut m.role },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Uint128>>(
                "election_id",
                |m: &MasterArbitrationUpdate| { &m.election_id },
                |m: &mut MasterArbitrationUpdate| { &mut m.election_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<super::status::Status>>(
                "status",
                |m: &MasterArbitrationUpdate| { &m.status },
                |m: &mut MasterArbitrationUpdate| { &mut m.status },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<MasterArbitrationUpdate>(
                "MasterArbitrationUpdate",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static MasterArbitrationUpdate {
        static instance: ::protobuf::rt::LazyV2<MasterArbitrationUpdate> = ::protobuf::rt::LazyV2::INIT;
        instance.get(MasterArbitrationUpdate::new)
    }
}

impl ::protobuf::Clear for MasterArbitrationUpdate {
    fn clear(&mut self) {
        self.device_id = 0;
        self.role.clear();
        self.election_id.clear();
        self.status.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for MasterArbitrationUpdate {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for MasterArbitrationUpdate {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Role {
    // message fields
    pub id: u64,
    pub config: ::protobuf::SingularPtrField<::protobuf::well_known_types::Any>,
    pub name: ::std::string::String,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Role {
    fn default() -> &'a Role {
        <Role as ::protobuf::Message>::default_instance()
    }
}

impl Role {
    pub fn new() -> Role {
        ::std::default::Default::default()
    }

    // uint64 id = 1;


    pub fn get_id(&self) -> u64 {
        self.id
    }
    pub fn clear_id(&mut self) {
        self.id = 0;
    }

    // Param is passed by value, moved
    pub fn set_id(&mut self, v: u64) {
        self.id = v;
    }

    // .google.protobuf.Any config = 2;


    pub fn get_config(&self) -> &::protobuf::well_known_types::Any {
        self.config.as_ref().unwrap_or_else(|| <::protobuf::well_known_types::Any as ::protobuf::Message>::default_instance())
    }
    pub fn clear_config(&mut self) {
        self.config.clear();
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    // Param is passed by value, moved
    pub fn set_config(&mut self, v: ::protobuf::well_known_types::Any) {
        self.config = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_config(&mut self) -> &mut ::protobuf::well_known_types::Any {
        if self.config.is_none() {
            self.config.set_default();
        }
        self.config.as_mut().unwrap()
    }

    // Take field
    pub fn take_config(&mut self) -> ::protobuf::well_known_types::Any {
        self.config.take().unwrap_or_else(|| ::protobuf::well_known_types::Any::new())
    }

    // string name = 3;


    pub fn get_name(&self) -> &str {
        &self.name
    }
    pub fn clear_name(&mut self) {
        self.name.clear();
    }

    // Param is passed by value, moved
    pub fn set_name(&mut self, v: ::std::string::String) {
        self.name = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_name(&mut self) -> &mut ::std::string::String {
        &mut self.name
    }

    // Take field
    pub fn take_name(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.name, ::std::string::String::new())
    }
}

impl ::protobuf::Message for Role {
    fn is_initialized(&self) -> bool {
        for v in &self.config {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.id = tmp;
                },
                2 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.config)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.name)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.id, ::protobuf::wire_format::WireTypeVarint);
        }
        if let Some(ref v) = self.config.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if !self.name.is_empty() {
            my_size += ::protobuf::rt::string_size(3, &self.name);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.id != 0 {
            os.write_uint64(1, self.id)?;
        }
        if let Some(ref v) = self.config.as_ref() {
            os.write_tag(2, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if !self.name.is_empty() {
            os.write_string(3, &self.name)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Role {
        Role::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "id",
                |m: &Role| { &m.id },
                |m: &mut Role| { &mut m.id },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<::protobuf::well_known_types::Any>>(
                "config",
                |m: &Role| { &m.config },
                |m: &mut Role| { &mut m.config },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "name",
                |m: &Role| { &m.name },
                |m: &mut Role| { &mut m.name },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Role>(
                "Role",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Role {
        static instance: ::protobuf::rt::LazyV2<Role> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Role::new)
    }
}

impl ::protobuf::Clear for Role {
    fn clear(&mut self) {
        self.id = 0;
        self.config.clear();
        self.name.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Role {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Role {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Uint128 {
    // message fields
    pub high: u64,
    pub low: u64,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Uint128 {
    fn default() -> &'a Uint128 {
        <Uint128 as ::protobuf::Message>::default_instance()
    }
}

impl Uint128 {
    pub fn new() -> Uint128 {
        ::std::default::Default::default()
    }

    // uint64 high = 1;


    pub fn get_high(&self) -> u64 {
        self.high
    }
    pub fn clear_high(&mut self) {
        self.high = 0;
    }

    // Param is passed by value, moved
    pub fn set_high(&mut self, v: u64) {
        self.high = v;
    }

    // uint64 low = 2;


    pub fn get_low(&self) -> u64 {
        self.low
    }
    pub fn clear_low(&mut self) {
        self.low = 0;
    }

    // Param is passed by value, moved
    pub fn set_low(&mut self, v: u64) {
        self.low = v;
    }
}

impl ::protobuf::Message for Uint128 {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.high = tmp;
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.low = tmp;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.high != 0 {
            my_size += ::protobuf::rt::value_size(1, self.high, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.low != 0 {
            my_size += ::protobuf::rt::value_size(2, self.low, ::protobuf::wire_format::WireTypeVarint);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.high != 0 {
            os.write_uint64(1, self.high)?;
        }
        if self.low != 0 {
            os.write_uint64(2, self.low)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Uint128 {
        Uint128::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "high",
                |m: &Uint128| { &m.high },
                |m: &mut Uint128| { &mut m.high },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "low",
                |m: &Uint128| { &m.low },
                |m: &mut Uint128| { &mut m.low },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Uint128>(
                "Uint128",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Uint128 {
        static instance: ::protobuf::rt::LazyV2<Uint128> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Uint128::new)
    }
}

impl ::protobuf::Clear for Uint128 {
    fn clear(&mut self) {
        self.high = 0;
        self.low = 0;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Uint128 {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Uint128 {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct SetForwardingPipelineConfigRequest {
    // message fields
    pub device_id: u64,
    pub role_id: u64,
    pub role: ::std::string::String,
    pub election_id: ::protobuf::SingularPtrField<Uint128>,
    pub action: SetForwardingPipelineConfigRequest_Action,
    pub config: ::protobuf::SingularPtrField<ForwardingPipelineConfig>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a SetForwardingPipelineConfigRequest {
    fn default() -> &'a SetForwardingPipelineConfigRequest {
        <SetForwardingPipelineConfigRequest as ::protobuf::Message>::default_instance()
    }
}

impl SetForwardingPipelineConfigRequest {
    pub fn new() -> SetForwardingPipelineConfigRequest {
        ::std::default::Default::default()
    }

    // uint64 device_id = 1;


    pub fn get_device_id(&self) -> u64 {
        self.device_id
    }
    pub fn clear_device_id(&mut self) {
        self.device_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_device_id(&mut self, v: u64) {
        self.device_id = v;
    }

    // uint64 role_id = 2;


    pub fn get_role_id(&self) -> u64 {
        self.role_id
    }
    pub fn clear_role_id(&mut self) {
        self.role_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_role_id(&mut self, v: u64) {
        self.role_id = v;
    }

    // string role = 6;


    pub fn get_role(&self) -> &str {
        &self.role
    }
    pub fn clear_role(&mut self) {
        self.role.clear();
    }

    // Param is passed by value, moved
    pub fn set_role(&mut self, v: ::std::string::String) {
        self.role = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_role(&mut self) -> &mut ::std::string::String {
        &mut self.role
    }

    // Take field
    pub fn take_role(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.role, ::std::string::String::new())
    }

    // .p4.v1.Uint128 election_id = 3;


    pub fn get_election_id(&self) -> &Uint128 {
        self.election_id.as_ref().unwrap_or_else(|| <Uint128 as ::protobuf::Message>::default_instance())
    }
    pub fn clear_election_id(&mut self) {
        self.election_id.clear();
    }

    pub fn has_election_id(&self) -> bool {
        self.election_id.is_some()
    }

    // Param is passed by value, moved
    pub fn set_election_id(&mut self, v: Uint128) {
        self.election_id = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_election_id(&mut self) -> &mut Uint128 {
        if self.election_id.is_none() {
            self.election_id.set_default();
        }
        self.election_id.as_mut().unwrap()
    }

    // Take field
    pub fn take_election_id(&mut self) -> Uint128 {
        self.election_id.take().unwrap_or_else(|| Uint128::new())
    }

    // .p4.v1.SetForwardingPipelineConfigRequest.Action action = 4;


    pub fn get_action(&self) -> SetForwardingPipelineConfigRequest_Action {
        self.action
    }
    pub fn clear_action(&mut self) {
        self.action = SetForwardingPipelineConfigRequest_Action::UNSPECIFIED;
    }

    // Param is passed by value, moved
    pub fn set_action(&mut self, v: SetForwardingPipelineConfigRequest_Action) {
        self.action = v;
    }

    // .p4.v1.ForwardingPipelineConfig config = 5;


    pub fn get_config(&self) -> &ForwardingPipelineConfig {
        self.config.as_ref().unwrap_or_else(|| <ForwardingPipelineConfig as ::protobuf::Message>::default_instance())
    }
    pub fn clear_config(&mut self) {
        self.config.clear();
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    // Param is passed by value, moved
    pub fn set_config(&mut self, v: ForwardingPipelineConfig) {
        self.config = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_config(&mut self) -> &mut ForwardingPipelineConfig {
        if self.config.is_none() {
            self.config.set_default();
        }
        self.config.as_mut().unwrap()
    }

    // Take field
    pub fn take_config(&mut self) -> ForwardingPipelineConfig {
        self.config.take().unwrap_or_else(|| ForwardingPipelineConfig::new())
    }
}

impl ::protobuf::Message for SetForwardingPipelineConfigRequest {
    fn is_initialized(&self) -> bool {
        for v in &self.election_id {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.config {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.device_id = tmp;
                },
                2 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.role_id = tmp;
                },
                6 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.role)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.election_id)?;
                },
                4 => {
                    ::protobuf::rt::read_proto3_enum_with_unknown_fields_into(wire_type, is, &mut self.action, 4, &mut self.unknown_fields)?
                },
                5 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.config)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.device_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.device_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.role_id != 0 {
            my_size += ::protobuf::rt::value_size(2, self.role_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.role.is_empty() {
            my_size += ::protobuf::rt::string_size(6, &self.role);
        }
        if let Some(ref v) = self.election_id.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if self.action != SetForwardingPipelineConfigRequest_Action::UNSPECIFIED {
            my_size += ::protobuf::rt::enum_size(4, self.action);
        }
        if let Some(ref v) = self.config.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.device_id != 0 {
            os.write_uint64(1, self.device_id)?;
        }
        if self.role_id != 0 {
            os.write_uint64(2, self.role_id)?;
        }
        if !self.role.is_empty() {
            os.write_string(6, &self.role)?;
        }
        if let Some(ref v) = self.election_id.as_ref() {
            os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if self.action != SetForwardingPipelineConfigRequest_Action::UNSPECIFIED {
            os.write_enum(4, ::protobuf::ProtobufEnum::value(&self.action))?;
        }
        if let Some(ref v) = self.config.as_ref() {
            os.write_tag(5, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> SetForwardingPipelineConfigRequest {
        SetForwardingPipelineConfigRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "device_id",
                |m: &SetForwardingPipelineConfigRequest| { &m.device_id },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.device_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "role_id",
                |m: &SetForwardingPipelineConfigRequest| { &m.role_id },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.role_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "role",
                |m: &SetForwardingPipelineConfigRequest| { &m.role },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.role },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<Uint128>>(
                "election_id",
                |m: &SetForwardingPipelineConfigRequest| { &m.election_id },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.election_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeEnum<SetForwardingPipelineConfigRequest_Action>>(
                "action",
                |m: &SetForwardingPipelineConfigRequest| { &m.action },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.action },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<ForwardingPipelineConfig>>(
                "config",
                |m: &SetForwardingPipelineConfigRequest| { &m.config },
                |m: &mut SetForwardingPipelineConfigRequest| { &mut m.config },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<SetForwardingPipelineConfigRequest>(
                "SetForwardingPipelineConfigRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static SetForwardingPipelineConfigRequest {
        static instance: ::protobuf::rt::LazyV2<SetForwardingPipelineConfigRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(SetForwardingPipelineConfigRequest::new)
    }
}

impl ::protobuf::Clear for SetForwardingPipelineConfigRequest {
    fn clear(&mut self) {
        self.device_id = 0;
        self.role_id = 0;
        self.role.clear();
        self.election_id.clear();
        self.action = SetForwardingPipelineConfigRequest_Action::UNSPECIFIED;
        self.config.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for SetForwardingPipelineConfigRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for SetForwardingPipelineConfigRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(Clone,PartialEq,Eq,Debug,Hash)]
pub enum SetForwardingPipelineConfigRequest_Action {
    UNSPECIFIED = 0,
    VERIFY = 1,
    VERIFY_AND_SAVE = 2,
    VERIFY_AND_COMMIT = 3,
    COMMIT = 4,
    RECONCILE_AND_COMMIT = 5,
}

impl ::protobuf::ProtobufEnum for SetForwardingPipelineConfigRequest_Action {
    fn value(&self) -> i32 {
        *self as i32
    }

    fn from_i32(value: i32) -> ::std::option::Option<SetForwardingPipelineConfigRequest_Action> {
        match value {
            0 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::UNSPECIFIED),
            1 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::VERIFY),
            2 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::VERIFY_AND_SAVE),
            3 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::VERIFY_AND_COMMIT),
            4 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::COMMIT),
            5 => ::std::option::Option::Some(SetForwardingPipelineConfigRequest_Action::RECONCILE_AND_COMMIT),
            _ => ::std::option::Option::None
        }
    }

    fn values() -> &'static [Self] {
        static values: &'static [SetForwardingPipelineConfigRequest_Action] = &[
            SetForwardingPipelineConfigRequest_Action::UNSPECIFIED,
            SetForwardingPipelineConfigRequest_Action::VERIFY,
            SetForwardingPipelineConfigRequest_Action::VERIFY_AND_SAVE,
            SetForwardingPipelineConfigRequest_Action::VERIFY_AND_COMMIT,
            SetForwardingPipelineConfigRequest_Action::COMMIT,
            SetForwardingPipelineConfigRequest_Action::RECONCILE_AND_COMMIT,
        ];
        values
    }

    fn enum_descriptor_static() -> &'static ::protobuf::reflect::EnumDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::EnumDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            ::protobuf::reflect::EnumDescriptor::new_pb_name::<SetForwardingPipelineConfigRequest_Action>("SetForwardingPipelineConfigRequest.Action", file_descriptor_proto())
        })
    }
}

impl ::std::marker::Copy for SetForwardingPipelineConfigRequest_Action {
}

impl ::std::default::Default for SetForwardingPipelineConfigRequest_Action {
    fn default() -> Self {
        SetForwardingPipelineConfigRequest_Action::UNSPECIFIED
    }
}

impl ::protobuf::reflect::ProtobufValue for SetForwardingPipelineConfigRequest_Action {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Enum(::protobuf::ProtobufEnum::descriptor(self))
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct SetForwardingPipelineConfigResponse {
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a SetForwardingPipelineConfigResponse {
    fn default() -> &'a SetForwardingPipelineConfigResponse {
        <SetForwardingPipelineConfigResponse as ::protobuf::Message>::default_instance()
    }
}

impl SetForwardingPipelineConfigResponse {
    pub fn new() -> SetForwardingPipelineConfigResponse {
        ::std::default::Default::default()
    }
}

impl ::protobuf::Message for SetForwardingPipelineConfigResponse {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> SetForwardingPipelineConfigResponse {
        SetForwardingPipelineConfigResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let fields = ::std::vec::Vec::new();
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<SetForwardingPipelineConfigResponse>(
                "SetForwardingPipelineConfigResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static SetForwardingPipelineConfigResponse {
        static instance: ::protobuf::rt::LazyV2<SetForwardingPipelineConfigResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(SetForwardingPipelineConfigResponse::new)
    }
}

impl ::protobuf::Clear for SetForwardingPipelineConfigResponse {
    fn clear(&mut self) {
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for SetForwardingPipelineConfigResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for SetForwardingPipelineConfigResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct ForwardingPipelineConfig {
    // message fields
    pub p4info: ::protobuf::SingularPtrField<super::p4info::P4Info>,
    pub p4_device_config: ::std::vec::Vec<u8>,
    pub cookie: ::protobuf::SingularPtrField<ForwardingPipelineConfig_Cookie>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a ForwardingPipelineConfig {
    fn default() -> &'a ForwardingPipelineConfig {
        <ForwardingPipelineConfig as ::protobuf::Message>::default_instance()
    }
}

impl ForwardingPipelineConfig {
    pub fn new() -> ForwardingPipelineConfig {
        ::std::default::Default::default()
    }

    // .p4.config.v1.P4Info p4info = 1;


    pub fn get_p4info(&self) -> &super::p4info::P4Info {
        self.p4info.as_ref().unwrap_or_else(|| <super::p4info::P4Info as ::protobuf::Message>::default_instance())
    }
    pub fn clear_p4info(&mut self) {
        self.p4info.clear();
    }

    pub fn has_p4info(&self) -> bool {
        self.p4info.is_some()
    }

    // Param is passed by value, moved
    pub fn set_p4info(&mut self, v: super::p4info::P4Info) {
        self.p4info = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_p4info(&mut self) -> &mut super::p4info::P4Info {
        if self.p4info.is_none() {
            self.p4info.set_default();
        }
        self.p4info.as_mut().unwrap()
    }

    // Take field
    pub fn take_p4info(&mut self) -> super::p4info::P4Info {
        self.p4info.take().unwrap_or_else(|| super::p4info::P4Info::new())
    }

    // bytes p4_device_config = 2;


    pub fn get_p4_device_config(&self) -> &[u8] {
        &self.p4_device_config
    }
    pub fn clear_p4_device_config(&mut self) {
        self.p4_device_config.clear();
    }

    // Param is passed by value, moved
    pub fn set_p4_device_config(&mut self, v: ::std::vec::Vec<u8>) {
        self.p4_device_config = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_p4_device_config(&mut self) -> &mut ::std::vec::Vec<u8> {
        &mut self.p4_device_config
    }

    // Take field
    pub fn take_p4_device_config(&mut self) -> ::std::vec::Vec<u8> {
        ::std::mem::replace(&mut self.p4_device_config, ::std::vec::Vec::new())
    }

    // .p4.v1.ForwardingPipelineConfig.Cookie cookie = 3;


    pub fn get_cookie(&self) -> &ForwardingPipelineConfig_Cookie {
        self.cookie.as_ref().unwrap_or_else(|| <ForwardingPipelineConfig_Cookie as ::protobuf::Message>::default_instance())
    }
    pub fn clear_cookie(&mut self) {
        self.cookie.clear();
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }

    // Param is passed by value, moved
    pub fn set_cookie(&mut self, v: ForwardingPipelineConfig_Cookie) {
        self.cookie = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_cookie(&mut self) -> &mut ForwardingPipelineConfig_Cookie {
        if self.cookie.is_none() {
            self.cookie.set_default();
        }
        self.cookie.as_mut().unwrap()
    }

    // Take field
    pub fn take_cookie(&mut self) -> ForwardingPipelineConfig_Cookie {
        self.cookie.take().unwrap_or_else(|| ForwardingPipelineConfig_Cookie::new())
    }
}

impl ::protobuf::Message for ForwardingPipelineConfig {
    fn is_initialized(&self) -> bool {
        for v in &self.p4info {
            if !v.is_initialized() {
                return false;
            }
        };
        for v in &self.cookie {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.p4info)?;
                },
                2 => {
                    ::protobuf::rt::read_singular_proto3_bytes_into(wire_type, is, &mut self.p4_device_config)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.cookie)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let Some(ref v) = self.p4info.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        if !self.p4_device_config.is_empty() {
            my_size += ::protobuf::rt::bytes_size(2, &self.p4_device_config);
        }
        if let Some(ref v) = self.cookie.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let Some(ref v) = self.p4info.as_ref() {
            os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        if !self.p4_device_config.is_empty() {
            os.write_bytes(2, &self.p4_device_config)?;
        }
        if let Some(ref v) = self.cookie.as_ref() {
            os.write_tag(3, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> ForwardingPipelineConfig {
        ForwardingPipelineConfig::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<super::p4info::P4Info>>(
                "p4info",
                |m: &ForwardingPipelineConfig| { &m.p4info },
                |m: &mut ForwardingPipelineConfig| { &mut m.p4info },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeBytes>(
                "p4_device_config",
                |m: &ForwardingPipelineConfig| { &m.p4_device_config },
                |m: &mut ForwardingPipelineConfig| { &mut m.p4_device_config },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<ForwardingPipelineConfig_Cookie>>(
                "cookie",
                |m: &ForwardingPipelineConfig| { &m.cookie },
                |m: &mut ForwardingPipelineConfig| { &mut m.cookie },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<ForwardingPipelineConfig>(
                "ForwardingPipelineConfig",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static ForwardingPipelineConfig {
        static instance: ::protobuf::rt::LazyV2<ForwardingPipelineConfig> = ::protobuf::rt::LazyV2::INIT;
        instance.get(ForwardingPipelineConfig::new)
    }
}

impl ::protobuf::Clear for ForwardingPipelineConfig {
    fn clear(&mut self) {
        self.p4info.clear();
        self.p4_device_config.clear();
        self.cookie.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for ForwardingPipelineConfig {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for ForwardingPipelineConfig {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct ForwardingPipelineConfig_Cookie {
    // message fields
    pub cookie: u64,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a ForwardingPipelineConfig_Cookie {
    fn default() -> &'a ForwardingPipelineConfig_Cookie {
        <ForwardingPipelineConfig_Cookie as ::protobuf::Message>::default_instance()
    }
}

impl ForwardingPipelineConfig_Cookie {
    pub fn new() -> ForwardingPipelineConfig_Cookie {
        ::std::default::Default::default()
    }

    // uint64 cookie = 1;


    pub fn get_cookie(&self) -> u64 {
        self.cookie
    }
    pub fn clear_cookie(&mut self) {
        self.cookie = 0;
    }

    // Param is passed by value, moved
    pub fn set_cookie(&mut self, v: u64) {
        self.cookie = v;
    }
}

impl ::protobuf::Message for ForwardingPipelineConfig_Cookie {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.cookie = tmp;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.cookie != 0 {
            my_size += ::protobuf::rt::value_size(1, self.cookie, ::protobuf::wire_format::WireTypeVarint);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.cookie != 0 {
            os.write_uint64(1, self.cookie)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> ForwardingPipelineConfig_Cookie {
        ForwardingPipelineConfig_Cookie::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "cookie",
                |m: &ForwardingPipelineConfig_Cookie| { &m.cookie },
                |m: &mut ForwardingPipelineConfig_Cookie| { &mut m.cookie },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<ForwardingPipelineConfig_Cookie>(
                "ForwardingPipelineConfig.Cookie",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static ForwardingPipelineConfig_Cookie {
        static instance: ::protobuf::rt::LazyV2<ForwardingPipelineConfig_Cookie> = ::protobuf::rt::LazyV2::INIT;
        instance.get(ForwardingPipelineConfig_Cookie::new)
    }
}

impl ::protobuf::Clear for ForwardingPipelineConfig_Cookie {
    fn clear(&mut self) {
        self.cookie = 0;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for ForwardingPipelineConfig_Cookie {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for ForwardingPipelineConfig_Cookie {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct GetForwardingPipelineConfigRequest {
    // message fields
    pub device_id: u64,
    pub response_type: GetForwardingPipelineConfigRequest_ResponseType,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a GetForwardingPipelineConfigRequest {
    fn default() -> &'a GetForwardingPipelineConfigRequest {
        <GetForwardingPipelineConfigRequest as ::protobuf::Message>::default_instance()
    }
}

impl GetForwardingPipelineConfigRequest {
    pub fn new() -> GetForwardingPipelineConfigRequest {
        ::std::default::Default::default()
    }

    // uint64 device_id = 1;


    pub fn get_device_id(&self) -> u64 {
        self.device_id
    }
    pub fn clear_device_id(&mut self) {
        self.device_id = 0;
    }

    // Param is passed by value, moved
    pub fn set_device_id(&mut self, v: u64) {
        self.device_id = v;
    }

    // .p4.v1.GetForwardingPipelineConfigRequest.ResponseType response_type = 2;


    pub fn get_response_type(&self) -> GetForwardingPipelineConfigRequest_ResponseType {
        self.response_type
    }
    pub fn clear_response_type(&mut self) {
        self.response_type = GetForwardingPipelineConfigRequest_ResponseType::ALL;
    }

    // Param is passed by value, moved
    pub fn set_response_type(&mut self, v: GetForwardingPipelineConfigRequest_ResponseType) {
        self.response_type = v;
    }
}

impl ::protobuf::Message for GetForwardingPipelineConfigRequest {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_uint64()?;
                    self.device_id = tmp;
                },
                2 => {
                    ::protobuf::rt::read_proto3_enum_with_unknown_fields_into(wire_type, is, &mut self.response_type, 2, &mut self.unknown_fields)?
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.device_id != 0 {
            my_size += ::protobuf::rt::value_size(1, self.device_id, ::protobuf::wire_format::WireTypeVarint);
        }
        if self.response_type != GetForwardingPipelineConfigRequest_ResponseType::ALL {
            my_size += ::protobuf::rt::enum_size(2, self.response_type);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.device_id != 0 {
            os.write_uint64(1, self.device_id)?;
        }
        if self.response_type != GetForwardingPipelineConfigRequest_ResponseType::ALL {
            os.write_enum(2, ::protobuf::ProtobufEnum::value(&self.response_type))?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> GetForwardingPipelineConfigRequest {
        GetForwardingPipelineConfigRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeUint64>(
                "device_id",
                |m: &GetForwardingPipelineConfigRequest| { &m.device_id },
                |m: &mut GetForwardingPipelineConfigRequest| { &mut m.device_id },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeEnum<GetForwardingPipelineConfigRequest_ResponseType>>(
                "response_type",
                |m: &GetForwardingPipelineConfigRequest| { &m.response_type },
                |m: &mut GetForwardingPipelineConfigRequest| { &mut m.response_type },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<GetForwardingPipelineConfigRequest>(
                "GetForwardingPipelineConfigRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static GetForwardingPipelineConfigRequest {
        static instance: ::protobuf::rt::LazyV2<GetForwardingPipelineConfigRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(GetForwardingPipelineConfigRequest::new)
    }
}

impl ::protobuf::Clear for GetForwardingPipelineConfigRequest {
    fn clear(&mut self) {
        self.device_id = 0;
        self.response_type = GetForwardingPipelineConfigRequest_ResponseType::ALL;
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for GetForwardingPipelineConfigRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for GetForwardingPipelineConfigRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(Clone,PartialEq,Eq,Debug,Hash)]
pub enum GetForwardingPipelineConfigRequest_ResponseType {
    ALL = 0,
    COOKIE_ONLY = 1,
    P4INFO_AND_COOKIE = 2,
    DEVICE_CONFIG_AND_COOKIE = 3,
}

impl ::protobuf::ProtobufEnum for GetForwardingPipelineConfigRequest_ResponseType {
    fn value(&self) -> i32 {
        *self as i32
    }

    fn from_i32(value: i32) -> ::std::option::Option<GetForwardingPipelineConfigRequest_ResponseType> {
        match value {
            0 => ::std::option::Option::Some(GetForwardingPipelineConfigRequest_ResponseType::ALL),
            1 => ::std::option::Option::Some(GetForwardingPipelineConfigRequest_ResponseType::COOKIE_ONLY),
            2 => ::std::option::Option::Some(GetForwardingPipelineConfigRequest_ResponseType::P4INFO_AND_COOKIE),
            3 => ::std::option::Option::Some(GetForwardingPipelineConfigRequest_ResponseType::DEVICE_CONFIG_AND_COOKIE),
            _ => ::std::option::Option::None
        }
    }

    fn values() -> &'static [Self] {
        static values: &'static [GetForwardingPipelineConfigRequest_ResponseType] = &[
            GetForwardingPipelineConfigRequest_ResponseType::ALL,
            GetForwardingPipelineConfigRequest_ResponseType::COOKIE_ONLY,
            GetForwardingPipelineConfigRequest_ResponseType::P4INFO_AND_COOKIE,
            GetForwardingPipelineConfigRequest_ResponseType::DEVICE_CONFIG_AND_COOKIE,
        ];
        values
    }

    fn enum_descriptor_static() -> &'static ::protobuf::reflect::EnumDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::EnumDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            ::protobuf::reflect::EnumDescriptor::new_pb_name::<GetForwardingPipelineConfigRequest_ResponseType>("GetForwardingPipelineConfigRequest.ResponseType", file_descriptor_proto())
        })
    }
}

impl ::std::marker::Copy for GetForwardingPipelineConfigRequest_ResponseType {
}

impl ::std::default::Default for GetForwardingPipelineConfigRequest_ResponseType {
    fn default() -> Self {
        GetForwardingPipelineConfigRequest_ResponseType::ALL
    }
}

impl ::protobuf::reflect::ProtobufValue for GetForwardingPipelineConfigRequest_ResponseType {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Enum(::protobuf::ProtobufEnum::descriptor(self))
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct GetForwardingPipelineConfigResponse {
    // message fields
    pub config: ::protobuf::SingularPtrField<ForwardingPipelineConfig>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a GetForwardingPipelineConfigResponse {
    fn default() -> &'a GetForwardingPipelineConfigResponse {
        <GetForwardingPipelineConfigResponse as ::protobuf::Message>::default_instance()
    }
}

impl GetForwardingPipelineConfigResponse {
    pub fn new() -> GetForwardingPipelineConfigResponse {
        ::std::default::Default::default()
    }

    // .p4.v1.ForwardingPipelineConfig config = 1;


    pub fn get_config(&self) -> &ForwardingPipelineConfig {
        self.config.as_ref().unwrap_or_else(|| <ForwardingPipelineConfig as ::protobuf::Message>::default_instance())
    }
    pub fn clear_config(&mut self) {
        self.config.clear();
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    // Param is passed by value, moved
    pub fn set_config(&mut self, v: ForwardingPipelineConfig) {
        self.config = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_config(&mut self) -> &mut ForwardingPipelineConfig {
        if self.config.is_none() {
            self.config.set_default();
        }
        self.config.as_mut().unwrap()
    }

    // Take field
    pub fn take_config(&mut self) -> ForwardingPipelineConfig {
        self.config.take().unwrap_or_else(|| ForwardingPipelineConfig::new())
    }
}

impl ::protobuf::Message for GetForwardingPipelineConfigResponse {
    fn is_initialized(&self) -> bool {
        for v in &self.config {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.config)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if let Some(ref v) = self.config.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if let Some(ref v) = self.config.as_ref() {
            os.write_tag(1, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> GetForwardingPipelineConfigResponse {
        GetForwardingPipelineConfigResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<ForwardingPipelineConfig>>(
                "config",
                |m: &GetForwardingPipelineConfigResponse| { &m.config },
                |m: &mut GetForwardingPipelineConfigResponse| { &mut m.config },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<GetForwardingPipelineConfigResponse>(
                "GetForwardingPipelineConfigResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static GetForwardingPipelineConfigResponse {
        static instance: ::protobuf::rt::LazyV2<GetForwardingPipelineConfigResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(GetForwardingPipelineConfigResponse::new)
    }
}

impl ::protobuf::Clear for GetForwardingPipelineConfigResponse {
    fn clear(&mut self) {
        self.config.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for GetForwardingPipelineConfigResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for GetForwardingPipelineConfigResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct Error {
    // message fields
    pub canonical_code: i32,
    pub message: ::std::string::String,
    pub space: ::std::string::String,
    pub code: i32,
    pub details: ::protobuf::SingularPtrField<::protobuf::well_known_types::Any>,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a Error {
    fn default() -> &'a Error {
        <Error as ::protobuf::Message>::default_instance()
    }
}

impl Error {
    pub fn new() -> Error {
        ::std::default::Default::default()
    }

    // int32 canonical_code = 1;


    pub fn get_canonical_code(&self) -> i32 {
        self.canonical_code
    }
    pub fn clear_canonical_code(&mut self) {
        self.canonical_code = 0;
    }

    // Param is passed by value, moved
    pub fn set_canonical_code(&mut self, v: i32) {
        self.canonical_code = v;
    }

    // string message = 2;


    pub fn get_message(&self) -> &str {
        &self.message
    }
    pub fn clear_message(&mut self) {
        self.message.clear();
    }

    // Param is passed by value, moved
    pub fn set_message(&mut self, v: ::std::string::String) {
        self.message = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_message(&mut self) -> &mut ::std::string::String {
        &mut self.message
    }

    // Take field
    pub fn take_message(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.message, ::std::string::String::new())
    }

    // string space = 3;


    pub fn get_space(&self) -> &str {
        &self.space
    }
    pub fn clear_space(&mut self) {
        self.space.clear();
    }

    // Param is passed by value, moved
    pub fn set_space(&mut self, v: ::std::string::String) {
        self.space = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_space(&mut self) -> &mut ::std::string::String {
        &mut self.space
    }

    // Take field
    pub fn take_space(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.space, ::std::string::String::new())
    }

    // int32 code = 4;


    pub fn get_code(&self) -> i32 {
        self.code
    }
    pub fn clear_code(&mut self) {
        self.code = 0;
    }

    // Param is passed by value, moved
    pub fn set_code(&mut self, v: i32) {
        self.code = v;
    }

    // .google.protobuf.Any details = 5;


    pub fn get_details(&self) -> &::protobuf::well_known_types::Any {
        self.details.as_ref().unwrap_or_else(|| <::protobuf::well_known_types::Any as ::protobuf::Message>::default_instance())
    }
    pub fn clear_details(&mut self) {
        self.details.clear();
    }

    pub fn has_details(&self) -> bool {
        self.details.is_some()
    }

    // Param is passed by value, moved
    pub fn set_details(&mut self, v: ::protobuf::well_known_types::Any) {
        self.details = ::protobuf::SingularPtrField::some(v);
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_details(&mut self) -> &mut ::protobuf::well_known_types::Any {
        if self.details.is_none() {
            self.details.set_default();
        }
        self.details.as_mut().unwrap()
    }

    // Take field
    pub fn take_details(&mut self) -> ::protobuf::well_known_types::Any {
        self.details.take().unwrap_or_else(|| ::protobuf::well_known_types::Any::new())
    }
}

impl ::protobuf::Message for Error {
    fn is_initialized(&self) -> bool {
        for v in &self.details {
            if !v.is_initialized() {
                return false;
            }
        };
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.canonical_code = tmp;
                },
                2 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.message)?;
                },
                3 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.space)?;
                },
                4 => {
                    if wire_type != ::protobuf::wire_format::WireTypeVarint {
                        return ::std::result::Result::Err(::protobuf::rt::unexpected_wire_type(wire_type));
                    }
                    let tmp = is.read_int32()?;
                    self.code = tmp;
                },
                5 => {
                    ::protobuf::rt::read_singular_message_into(wire_type, is, &mut self.details)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if self.canonical_code != 0 {
            my_size += ::protobuf::rt::value_size(1, self.canonical_code, ::protobuf::wire_format::WireTypeVarint);
        }
        if !self.message.is_empty() {
            my_size += ::protobuf::rt::string_size(2, &self.message);
        }
        if !self.space.is_empty() {
            my_size += ::protobuf::rt::string_size(3, &self.space);
        }
        if self.code != 0 {
            my_size += ::protobuf::rt::value_size(4, self.code, ::protobuf::wire_format::WireTypeVarint);
        }
        if let Some(ref v) = self.details.as_ref() {
            let len = v.compute_size();
            my_size += 1 + ::protobuf::rt::compute_raw_varint32_size(len) + len;
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if self.canonical_code != 0 {
            os.write_int32(1, self.canonical_code)?;
        }
        if !self.message.is_empty() {
            os.write_string(2, &self.message)?;
        }
        if !self.space.is_empty() {
            os.write_string(3, &self.space)?;
        }
        if self.code != 0 {
            os.write_int32(4, self.code)?;
        }
        if let Some(ref v) = self.details.as_ref() {
            os.write_tag(5, ::protobuf::wire_format::WireTypeLengthDelimited)?;
            os.write_raw_varint32(v.get_cached_size())?;
            v.write_to_with_cached_sizes(os)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> Error {
        Error::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "canonical_code",
                |m: &Error| { &m.canonical_code },
                |m: &mut Error| { &mut m.canonical_code },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "message",
                |m: &Error| { &m.message },
                |m: &mut Error| { &mut m.message },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "space",
                |m: &Error| { &m.space },
                |m: &mut Error| { &mut m.space },
            ));
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeInt32>(
                "code",
                |m: &Error| { &m.code },
                |m: &mut Error| { &mut m.code },
            ));
            fields.push(::protobuf::reflect::accessor::make_singular_ptr_field_accessor::<_, ::protobuf::types::ProtobufTypeMessage<::protobuf::well_known_types::Any>>(
                "details",
                |m: &Error| { &m.details },
                |m: &mut Error| { &mut m.details },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<Error>(
                "Error",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static Error {
        static instance: ::protobuf::rt::LazyV2<Error> = ::protobuf::rt::LazyV2::INIT;
        instance.get(Error::new)
    }
}

impl ::protobuf::Clear for Error {
    fn clear(&mut self) {
        self.canonical_code = 0;
        self.message.clear();
        self.space.clear();
        self.code = 0;
        self.details.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for Error {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for Error {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct CapabilitiesRequest {
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a CapabilitiesRequest {
    fn default() -> &'a CapabilitiesRequest {
        <CapabilitiesRequest as ::protobuf::Message>::default_instance()
    }
}

impl CapabilitiesRequest {
    pub fn new() -> CapabilitiesRequest {
        ::std::default::Default::default()
    }
}

impl ::protobuf::Message for CapabilitiesRequest {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> CapabilitiesRequest {
        CapabilitiesRequest::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let fields = ::std::vec::Vec::new();
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<CapabilitiesRequest>(
                "CapabilitiesRequest",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static CapabilitiesRequest {
        static instance: ::protobuf::rt::LazyV2<CapabilitiesRequest> = ::protobuf::rt::LazyV2::INIT;
        instance.get(CapabilitiesRequest::new)
    }
}

impl ::protobuf::Clear for CapabilitiesRequest {
    fn clear(&mut self) {
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for CapabilitiesRequest {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for CapabilitiesRequest {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

#[derive(PartialEq,Clone,Default)]
pub struct CapabilitiesResponse {
    // message fields
    pub p4runtime_api_version: ::std::string::String,
    // special fields
    pub unknown_fields: ::protobuf::UnknownFields,
    pub cached_size: ::protobuf::CachedSize,
}

impl<'a> ::std::default::Default for &'a CapabilitiesResponse {
    fn default() -> &'a CapabilitiesResponse {
        <CapabilitiesResponse as ::protobuf::Message>::default_instance()
    }
}

impl CapabilitiesResponse {
    pub fn new() -> CapabilitiesResponse {
        ::std::default::Default::default()
    }

    // string p4runtime_api_version = 1;


    pub fn get_p4runtime_api_version(&self) -> &str {
        &self.p4runtime_api_version
    }
    pub fn clear_p4runtime_api_version(&mut self) {
        self.p4runtime_api_version.clear();
    }

    // Param is passed by value, moved
    pub fn set_p4runtime_api_version(&mut self, v: ::std::string::String) {
        self.p4runtime_api_version = v;
    }

    // Mutable pointer to the field.
    // If field is not initialized, it is initialized with default value first.
    pub fn mut_p4runtime_api_version(&mut self) -> &mut ::std::string::String {
        &mut self.p4runtime_api_version
    }

    // Take field
    pub fn take_p4runtime_api_version(&mut self) -> ::std::string::String {
        ::std::mem::replace(&mut self.p4runtime_api_version, ::std::string::String::new())
    }
}

impl ::protobuf::Message for CapabilitiesResponse {
    fn is_initialized(&self) -> bool {
        true
    }

    fn merge_from(&mut self, is: &mut ::protobuf::CodedInputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    ::protobuf::rt::read_singular_proto3_string_into(wire_type, is, &mut self.p4runtime_api_version)?;
                },
                _ => {
                    ::protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, is, self.mut_unknown_fields())?;
                },
            };
        }
        ::std::result::Result::Ok(())
    }

    // Compute sizes of nested messages
    #[allow(unused_variables)]
    fn compute_size(&self) -> u32 {
        let mut my_size = 0;
        if !self.p4runtime_api_version.is_empty() {
            my_size += ::protobuf::rt::string_size(1, &self.p4runtime_api_version);
        }
        my_size += ::protobuf::rt::unknown_fields_size(self.get_unknown_fields());
        self.cached_size.set(my_size);
        my_size
    }

    fn write_to_with_cached_sizes(&self, os: &mut ::protobuf::CodedOutputStream<'_>) -> ::protobuf::ProtobufResult<()> {
        if !self.p4runtime_api_version.is_empty() {
            os.write_string(1, &self.p4runtime_api_version)?;
        }
        os.write_unknown_fields(self.get_unknown_fields())?;
        ::std::result::Result::Ok(())
    }

    fn get_cached_size(&self) -> u32 {
        self.cached_size.get()
    }

    fn get_unknown_fields(&self) -> &::protobuf::UnknownFields {
        &self.unknown_fields
    }

    fn mut_unknown_fields(&mut self) -> &mut ::protobuf::UnknownFields {
        &mut self.unknown_fields
    }

    fn as_any(&self) -> &dyn (::std::any::Any) {
        self as &dyn (::std::any::Any)
    }
    fn as_any_mut(&mut self) -> &mut dyn (::std::any::Any) {
        self as &mut dyn (::std::any::Any)
    }
    fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn (::std::any::Any)> {
        self
    }

    fn descriptor(&self) -> &'static ::protobuf::reflect::MessageDescriptor {
        Self::descriptor_static()
    }

    fn new() -> CapabilitiesResponse {
        CapabilitiesResponse::new()
    }

    fn descriptor_static() -> &'static ::protobuf::reflect::MessageDescriptor {
        static descriptor: ::protobuf::rt::LazyV2<::protobuf::reflect::MessageDescriptor> = ::protobuf::rt::LazyV2::INIT;
        descriptor.get(|| {
            let mut fields = ::std::vec::Vec::new();
            fields.push(::protobuf::reflect::accessor::make_simple_field_accessor::<_, ::protobuf::types::ProtobufTypeString>(
                "p4runtime_api_version",
                |m: &CapabilitiesResponse| { &m.p4runtime_api_version },
                |m: &mut CapabilitiesResponse| { &mut m.p4runtime_api_version },
            ));
            ::protobuf::reflect::MessageDescriptor::new_pb_name::<CapabilitiesResponse>(
                "CapabilitiesResponse",
                fields,
                file_descriptor_proto()
            )
        })
    }

    fn default_instance() -> &'static CapabilitiesResponse {
        static instance: ::protobuf::rt::LazyV2<CapabilitiesResponse> = ::protobuf::rt::LazyV2::INIT;
        instance.get(CapabilitiesResponse::new)
    }
}

impl ::protobuf::Clear for CapabilitiesResponse {
    fn clear(&mut self) {
        self.p4runtime_api_version.clear();
        self.unknown_fields.clear();
    }
}

impl ::std::fmt::Debug for CapabilitiesResponse {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        ::protobuf::text_format::fmt(self, f)
    }
}

impl ::protobuf::reflect::ProtobufValue for CapabilitiesResponse {
    fn as_ref(&self) -> ::protobuf::reflect::ReflectValueRef {
        ::protobuf::reflect::ReflectValueRef::Message(self)
    }
}

static file_descriptor_proto_data: &'static [u8] = b"\
    \n\x15p4/v1/p4runtime.proto\x12\x05p4.v1\x1a\x19google/protobuf/any.prot\
    o\x1a\x17google/rpc/status.proto\x1a\x19p4/config/v1/p4info.proto\"\xd0\
    \x02\n\x0cWriteRequest\x12\x1d\n\tdevice_id\x18\x01\x20\x01(\x04R\x08dev\
    iceIdB\0\x12\x19\n\x07role_id\x18\x02\x20\x01(\x04R\x06roleIdB\0\x121\n\
    \x0belection_id\x18\x03\x20\x01(\x0b2\x0e.p4.v1.Uint128R\nelectionIdB\0\
    \x12)\n\x07updates\x18\x04\x20\x03(\x0b2\r.p4.v1.UpdateR\x07updatesB\0\
    \x12=\n\tatomicity\x18\x05\x20\x01(\x0e2\x1d.p4.v1.WriteRequest.Atomicit\
    yR\tatomicityB\0\x12\x14\n\x04role\x18\x06\x20\x01(\tR\x04roleB\0\"Q\n\t\
    Atomicity\x12\x15\n\x11CONTINUE_ON_ERROR\x10\0\x12\x15\n\x11ROLLBACK_ON_\
    ERROR\x10\x01\x12\x14\n\x10DATAPLANE_ATOMIC\x10\x02\x1a\0:\0\"\x11\n\rWr\
    iteResponse:\0\"q\n\x0bReadRequest\x12\x1d\n\tdevice_id\x18\x01\x20\x01(\
    \x04R\x08deviceIdB\0\x12\x14\n\x04role\x18\x03\x20\x01(\tR\x04roleB\0\
    \x12+\n\x08entities\x18\x02\x20\x03(\x0b2\r.p4.v1.EntityR\x08entitiesB\0\
    :\0\"=\n\x0cReadResponse\x12+\n\x08entities\x18\x01\x20\x03(\x0b2\r.p4.v\
    1.EntityR\x08entitiesB\0:\0\"\x9c\x01\n\x06Update\x12(\n\x04type\x18\x01\
    \x20\x01(\x0e2\x12.p4.v1.Update.TypeR\x04typeB\0\x12'\n\x06entity\x18\
    \x02\x20\x01(\x0b2\r.p4.v1.EntityR\x06entityB\0\"=\n\x04Type\x12\x0f\n\
    \x0bUNSPECIFIED\x10\0\x12\n\n\x06INSERT\x10\x01\x12\n\n\x06MODIFY\x10\
    \x02\x12\n\n\x06DELETE\x10\x03\x1a\0:\0\"L\n\x06Entity\x126\n\x0btable_e\
    ntry\x18\x02\x20\x01(\x0b2\x11.p4.v1.TableEntryH\0R\ntableEntryB\0B\x08\
    \n\x06entity:\0\"\xe8\x02\n\nTableEntry\x12\x1b\n\x08table_id\x18\x01\
    \x20\x01(\rR\x07tableIdB\0\x12)\n\x05match\x18\x02\x20\x03(\x0b2\x11.p4.\
    v1.FieldMatchR\x05matchB\0\x12,\n\x06action\x18\x03\x20\x01(\x0b2\x12.p4\
    .v1.TableActionR\x06actionB\0\x12\x1c\n\x08priority\x18\x04\x20\x01(\x05\
    R\x08priorityB\0\x121\n\x13controller_metadata\x18\x05\x20\x01(\x04R\x12\
    controllerMetadataB\0\x12,\n\x11is_default_action\x18\x08\x20\x01(\x08R\
    \x0fisDefaultActionB\0\x12(\n\x0fidle_timeout_ns\x18\t\x20\x01(\x03R\rid\
    leTimeoutNsB\0\x12\x1c\n\x08metadata\x18\x0b\x20\x01(\x0cR\x08metadataB\
    \0\x12\x1b\n\x08is_const\x18\r\x20\x01(\x08R\x07isConstB\0:\0\"\xf2\x04\
    \n\nFieldMatch\x12\x1b\n\x08field_id\x18\x01\x20\x01(\rR\x07fieldIdB\0\
    \x121\n\x05exact\x18\x02\x20\x01(\x0b2\x17.p4.v1.FieldMatch.ExactH\0R\
    \x05exactB\0\x127\n\x07ternary\x18\x03\x20\x01(\x0b2\x19.p4.v1.FieldMatc\
    h.TernaryH\0R\x07ternaryB\0\x12+\n\x03lpm\x18\x04\x20\x01(\x0b2\x15.p4.v\
    1.FieldMatch.LPMH\0R\x03lpmB\0\x121\n\x05range\x18\x06\x20\x01(\x0b2\x17\
    .p4.v1.FieldMatch.RangeH\0R\x05rangeB\0\x12:\n\x08optional\x18\x07\x20\
    \x01(\x0b2\x1a.p4.v1.FieldMatch.OptionalH\0R\x08optionalB\0\x12.\n\x05ot\
    her\x18d\x20\x01(\x0b2\x14.google.protobuf.AnyH\0R\x05otherB\0\x1a!\n\
    \x05Exact\x12\x16\n\x05value\x18\x01\x20\x01(\x0cR\x05valueB\0:\0\x1a9\n\
    \x07Ternary\x12\x16\n\x05value\x18\x01\x20\x01(\x0cR\x05valueB\0\x12\x14\
    \n\x04mask\x18\x02\x20\x01(\x0cR\x04maskB\0:\0\x1a@\n\x03LPM\x12\x16\n\
    \x05value\x18\x01\x20\x01(\x0cR\x05valueB\0\x12\x1f\n\nprefix_len\x18\
    \x02\x20\x01(\x05R\tprefixLenB\0:\0\x1a3\n\x05Range\x12\x12\n\x03low\x18\
    \x01\x20\x01(\x0cR\x03lowB\0\x12\x14\n\x04high\x18\x02\x20\x01(\x0cR\x04\
    highB\0:\0\x1a$\n\x08Optional\x12\x16\n\x05value\x18\x01\x20\x01(\x0cR\
    \x05valueB\0:\0B\x12\n\x10field_match_type:\0\"\xba\x01\n\x0bTableAction\
    \x12)\n\x06action\x18\x01\x20\x01(\x0b2\r.p4.v1.ActionH\0R\x06actionB\0\
    \x12;\n\x18action_profile_member_id\x18\x02\x20\x01(\rH\0R\x15actionProf\
    ileMemberIdB\0\x129\n\x17action_profile_group_id\x18\x03\x20\x01(\rH\0R\
    \x14actionProfileGroupIdB\0B\x06\n\x04type:\0\"\x98\x01\n\x06Action\x12\
    \x1d\n\taction_id\x18\x01\x20\x01(\rR\x08actionIdB\0\x12-\n\x06params\
    \x18\x04\x20\x03(\x0b2\x13.p4.v1.Action.ParamR\x06paramsB\0\x1a>\n\x05Pa\
    ram\x12\x1b\n\x08param_id\x18\x02\x20\x01(\rR\x07paramIdB\0\x12\x16\n\
    \x05value\x18\x03\x20\x01(\x0cR\x05valueB\0:\0:\0\"\x98\x01\n\x14StreamM\
    essageRequest\x12D\n\x0barbitration\x18\x01\x20\x01(\x0b2\x1e.p4.v1.Mast\
    erArbitrationUpdateH\0R\x0barbitrationB\0\x12.\n\x05other\x18\x04\x20\
    \x01(\x0b2\x14.google.protobuf.AnyH\0R\x05otherB\0B\x08\n\x06update:\0\"\
    \xc7\x01\n\x15StreamMessageResponse\x12D\n\x0barbitration\x18\x01\x20\
    \x01(\x0b2\x1e.p4.v1.MasterArbitrationUpdateH\0R\x0barbitrationB\0\x12.\
    \n\x05other\x18\x05\x20\x01(\x0b2\x14.google.protobuf.AnyH\0R\x05otherB\
    \0\x12,\n\x05error\x18\x06\x20\x01(\x0b2\x12.p4.v1.StreamErrorH\0R\x05er\
    rorB\0B\x08\n\x06update:\0\"\x82\x01\n\x0bStreamError\x12'\n\x0ecanonica\
    l_code\x18\x01\x20\x01(\x05R\rcanonicalCodeB\0\x12\x1a\n\x07message\x18\
    \x02\x20\x01(\tR\x07messageB\0\x12\x16\n\x05space\x18\x03\x20\x01(\tR\
    \x05spaceB\0\x12\x14\n\x04code\x18\x04\x20\x01(\x05R\x04codeB\0:\0\"\xbe\
    \x01\n\x17MasterArbitrationUpdate\x12\x1d\n\tdevice_id\x18\x01\x20\x01(\
    \x04R\x08deviceIdB\0\x12!\n\x04role\x18\x02\x20\x01(\x0b2\x0b.p4.v1.Role\
    R\x04roleB\0\x121\n\x0belection_id\x18\x03\x20\x01(\x0b2\x0e.p4.v1.Uint1\
    28R\nelectionIdB\0\x12,\n\x06status\x18\x04\x20\x01(\x0b2\x12.google.rpc\
    .StatusR\x06statusB\0:\0\"`\n\x04Role\x12\x10\n\x02id\x18\x01\x20\x01(\
    \x04R\x02idB\0\x12.\n\x06config\x18\x02\x20\x01(\x0b2\x14.google.protobu\
    f.AnyR\x06configB\0\x12\x14\n\x04name\x18\x03\x20\x01(\tR\x04nameB\0:\0\
    \"5\n\x07Uint128\x12\x14\n\x04high\x18\x01\x20\x01(\x04R\x04highB\0\x12\
    \x12\n\x03low\x18\x02\x20\x01(\x04R\x03lowB\0:\0\"\xab\x03\n\"SetForward\
    ingPipelineConfigRequest\x12\x1d\n\tdevice_id\x18\x01\x20\x01(\x04R\x08d\
    eviceIdB\0\x12\x19\n\x07role_id\x18\x02\x20\x01(\x04R\x06roleIdB\0\x12\
    \x14\n\x04role\x18\x06\x20\x01(\tR\x04roleB\0\x121\n\x0belection_id\x18\
    \x03\x20\x01(\x0b2\x0e.p4.v1.Uint128R\nelectionIdB\0\x12J\n\x06action\
    \x18\x04\x20\x01(\x0e20.p4.v1.SetForwardingPipelineConfigRequest.ActionR\
    \x06actionB\0\x129\n\x06config\x18\x05\x20\x01(\x0b2\x1f.p4.v1.Forwardin\
    gPipelineConfigR\x06configB\0\"y\n\x06Action\x12\x0f\n\x0bUNSPECIFIED\
    \x10\0\x12\n\n\x06VERIFY\x10\x01\x12\x13\n\x0fVERIFY_AND_SAVE\x10\x02\
    \x12\x15\n\x11VERIFY_AND_COMMIT\x10\x03\x12\n\n\x06COMMIT\x10\x04\x12\
    \x18\n\x14RECONCILE_AND_COMMIT\x10\x05\x1a\0:\0\"'\n#SetForwardingPipeli\
    neConfigResponse:\0\"\xe0\x01\n\x18ForwardingPipelineConfig\x12.\n\x06p4\
    info\x18\x01\x20\x01(\x0b2\x14.p4.config.v1.P4InfoR\x06p4infoB\0\x12*\n\
    \x10p4_device_config\x18\x02\x20\x01(\x0cR\x0ep4DeviceConfigB\0\x12@\n\
    \x06cookie\x18\x03\x20\x01(\x0b2&.p4.v1.ForwardingPipelineConfig.CookieR\
    \x06cookieB\0\x1a$\n\x06Cookie\x12\x18\n\x06cookie\x18\x01\x20\x01(\x04R\
    \x06cookieB\0:\0:\0\"\x85\x02\n\"GetForwardingPipelineConfigRequest\x12\
    \x1d\n\tdevice_id\x18\x01\x20\x01(\x04R\x08deviceIdB\0\x12]\n\rresponse_\
    type\x18\x02\x20\x01(\x0e26.p4.v1.GetForwardingPipelineConfigRequest.Res\
    ponseTypeR\x0cresponseTypeB\0\"_\n\x0cResponseType\x12\x07\n\x03ALL\x10\
    \0\x12\x0f\n\x0bCOOKIE_ONLY\x10\x01\x12\x15\n\x11P4INFO_AND_COOKIE\x10\
    \x02\x12\x1c\n\x18DEVICE_CONFIG_AND_COOKIE\x10\x03\x1a\0:\0\"b\n#GetForw\
    ardingPipelineConfigResponse\x129\n\x06config\x18\x01\x20\x01(\x0b2\x1f.\
    p4.v1.ForwardingPipelineConfigR\x06configB\0:\0\"\xae\x01\n\x05Error\x12\
    '\n\x0ecanonical_code\x18\x01\x20\x01(\x05R\rcanonicalCodeB\0\x12\x1a\n\
    \x07message\x18\x02\x20\x01(\tR\x07messageB\0\x12\x16\n\x05space\x18\x03\
    \x20\x01(\tR\x05spaceB\0\x12\x14\n\x04code\x18\x04\x20\x01(\x05R\x04code\
    B\0\x120\n\x07details\x18\x05\x20\x01(\x0b2\x14.google.protobuf.AnyR\x07\
    detailsB\0:\0\"\x17\n\x13CapabilitiesRequest:\0\"N\n\x14CapabilitiesResp\
    onse\x124\n\x15p4runtime_api_version\x18\x01\x20\x01(\tR\x13p4runtimeApi\
    VersionB\0:\0B\0b\x06proto3\
";

static file_descriptor_proto_lazy: ::protobuf::rt::LazyV2<::protobuf::descriptor::FileDescriptorProto> = ::protobuf::rt::LazyV2::INIT;

fn parse_descriptor_proto() -> ::protobuf::descriptor::FileDescriptorProto {
    ::protobuf::Message::parse_from_bytes(file_descriptor_proto_data).unwrap()
}

pub fn file_descriptor_proto() -> &'static ::protobuf::descriptor::FileDescriptorProto {
    file_descriptor_proto_lazy.get(|| {
        parse_descriptor_proto()
    })
}
